use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::load_settings, ClientDependencies, ClientEvent, ClientOptions, LiveClient, UiAction,
    ViewOwner,
};
use media_transport::{
    loopback::{LoopbackEngine, LoopbackHub, LoopbackTrack},
    ClientConfig, JoinOptions, MediaTrack, TransportClient,
};
use shared::domain::{ChannelName, ClientRole, MediaKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod surface;

use commands::{parse_line, Command, HELP};
use surface::TerminalSurface;

#[derive(Parser, Debug)]
struct Args {
    /// Config file; defaults to ./sneak.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    channel: Option<String>,
    /// Join as host right away.
    #[arg(long, conflicts_with = "watch")]
    host: bool,
    /// Join as audience right away.
    #[arg(long)]
    watch: bool,
    /// Start an in-process host publishing on the channel.
    #[arg(long)]
    demo_peer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref()).context("failed to load settings")?;
    if let Some(name) = args.name.clone() {
        settings.display_name = name;
    }
    if let Some(channel) = args.channel.clone() {
        settings.default_channel = channel;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = settings
        .store_backend()?
        .open()
        .await
        .context("failed to open message store")?;
    let hub = LoopbackHub::new();
    let client = LiveClient::new(
        ClientOptions::from_settings(&settings),
        ClientDependencies {
            engine: Arc::new(LoopbackEngine::with_hub(Arc::clone(&hub))),
            tokens: settings.token_provider(),
            store,
            surface: Arc::new(TerminalSurface::new()),
        },
    );
    client.start().await;

    let _demo_peer = if args.demo_peer {
        Some(start_demo_peer(&hub, &settings.default_channel).await?)
    } else {
        None
    };

    let mut events = client.subscribe_events();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::RemoteParticipantsUpdated(participants) => {
                    info!(count = participants.len(), "remote participants changed")
                }
                ClientEvent::ConnectionStateChanged(state) => info!(?state, "connection"),
                ClientEvent::Error(alert) => warn!(code = ?alert.code, "{}", alert.message),
                ClientEvent::SessionChanged(_) | ClientEvent::ChatStatusChanged(_) => {}
            }
        }
    });

    if args.host {
        client
            .dispatch(UiAction::JoinAsHost {
                channel: settings.default_channel.clone(),
                display_name: settings.display_name.clone(),
            })
            .await;
    } else if args.watch {
        client
            .dispatch(UiAction::JoinAsAudience {
                channel: settings.default_channel.clone(),
                display_name: settings.display_name.clone(),
            })
            .await;
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        match parse_line(&line, &settings.default_channel, &settings.display_name) {
            Some(Command::Action(action)) => client.dispatch(action).await,
            Some(Command::Who) => {
                let participants = client.media().remote_participants().await;
                if participants.is_empty() {
                    println!("* nobody else is publishing");
                }
                for participant in participants {
                    let view = client
                        .views()
                        .get(ViewOwner::Remote(participant.participant_id))
                        .await
                        .map_or_else(|| "none".to_string(), |view| format!("#{view}"));
                    println!(
                        "* user {} audio={} video={} view={view}",
                        participant.participant_id, participant.has_audio, participant.has_video
                    );
                }
            }
            Some(Command::Help) => println!("{HELP}"),
            Some(Command::Quit) => break,
            Some(Command::Unknown(name)) => println!("* unknown command /{name}, try /help"),
            None => {}
        }
    }

    client.shutdown().await;
    event_log.abort();
    Ok(())
}

/// Joins the local hub as a second host so a single process shows remote media.
async fn start_demo_peer(hub: &Arc<LoopbackHub>, channel: &str) -> Result<Arc<dyn TransportClient>> {
    let channel = ChannelName::parse(channel).context("demo peer needs a channel")?;
    let engine = LoopbackEngine::with_hub(Arc::clone(hub));
    let peer: Arc<dyn TransportClient> = engine.loopback_client(ClientConfig::live_broadcast());
    peer.set_client_role(ClientRole::Host, None).await?;
    let participant_id = peer
        .join(JoinOptions {
            app_id: "demo".to_string(),
            channel: channel.clone(),
            token: None,
            local_id: None,
        })
        .await?;
    let tracks: Vec<Arc<dyn MediaTrack>> = vec![
        Arc::new(LoopbackTrack::new(MediaKind::Audio, "demo-microphone")),
        Arc::new(LoopbackTrack::new(MediaKind::Video, "demo-camera")),
    ];
    peer.publish(tracks).await?;
    info!(%channel, %participant_id, "demo peer publishing");
    Ok(peer)
}
