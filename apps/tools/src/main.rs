use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::config::load_settings;
use shared::{domain::ChannelName, protocol::NewChatMessage};
use storage::MessageStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Config file; defaults to ./sneak.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reports which message store is configured and whether it is reachable.
    Check,
    History {
        channel: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    Post {
        channel: String,
        content: String,
        #[arg(long, default_value = "sneak-tools")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backend = settings.store_backend()?;
    let description = backend.to_string();
    let Some(store) = backend.open().await? else {
        bail!("no message store configured; set store_url/store_key or database_url");
    };

    match cli.command {
        Command::Check => {
            if store.is_available().await {
                println!("store ok: {description}");
            } else {
                bail!("store unavailable: {description}");
            }
        }
        Command::History { channel, limit } => {
            let channel = ChannelName::parse(&channel)?;
            let limit = limit.unwrap_or(settings.history_limit);
            for message in store.history(&channel, limit).await? {
                println!(
                    "{} {}: {}",
                    message.created_at.format("%Y-%m-%d %H:%M:%S"),
                    message.sender_name,
                    message.content
                );
            }
        }
        Command::Post {
            channel,
            content,
            name,
        } => {
            let stored = store
                .insert(NewChatMessage {
                    channel: ChannelName::parse(&channel)?,
                    content,
                    sender_id: format!("tools-{}", uuid::Uuid::new_v4()),
                    sender_name: name,
                    created_at: Utc::now(),
                })
                .await
                .context("failed to post message")?;
            match stored.id {
                Some(id) => println!("posted message id={id}"),
                None => println!("posted message"),
            }
        }
    }

    Ok(())
}
