//! In-process media hub.
//!
//! Clients created from the same [`LoopbackHub`] see each other's publications
//! the way members of a hosted media channel would: joins are announced to
//! late joiners as replayed publish events, publishes and unpublishes fan out
//! to co-members, and a leave fans out a single remote-left event. No media
//! bytes move; tracks only record what they were asked to render.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use shared::domain::{
    AudienceLatency, ChannelName, ClientRole, ConnectionState, MediaKind, ParticipantId,
    RemoteParticipant, ViewHandle,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::{
    ClientConfig, DeviceError, JoinOptions, MediaEngine, MediaTrack, TransportClient,
    TransportEvent,
};

const NO_TARGET: u64 = u64::MAX;

pub struct LoopbackTrack {
    kind: MediaKind,
    label: String,
    playing: AtomicBool,
    closed: AtomicBool,
    target: AtomicU64,
}

impl LoopbackTrack {
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            playing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            target: AtomicU64::new(NO_TARGET),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> Option<ViewHandle> {
        match self.target.load(Ordering::SeqCst) {
            NO_TARGET => None,
            raw => Some(ViewHandle(raw)),
        }
    }
}

impl MediaTrack for LoopbackTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn play(&self, target: Option<ViewHandle>) -> Result<()> {
        if self.is_closed() {
            bail!("{} track '{}' is closed", self.kind, self.label);
        }
        if self.kind == MediaKind::Video && target.is_none() {
            bail!("video track '{}' needs a view to play into", self.label);
        }
        self.target
            .store(target.map(|view| view.0).unwrap_or(NO_TARGET), Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
        debug!(track = %self.label, kind = %self.kind, ?target, "loopback: track playing");
        Ok(())
    }

    fn close(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Member {
    role: ClientRole,
    published: HashSet<MediaKind>,
    events: broadcast::Sender<TransportEvent>,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<ChannelName, HashMap<ParticipantId, Member>>,
}

impl HubState {
    fn fan_out(&self, channel: &ChannelName, from: ParticipantId, event: TransportEvent) {
        let Some(members) = self.channels.get(channel) else {
            return;
        };
        for (id, member) in members {
            if *id != from {
                let _ = member.events.send(event.clone());
            }
        }
    }
}

pub struct LoopbackHub {
    state: Mutex<HubState>,
    next_id: AtomicU32,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU32::new(1000),
        })
    }

    pub async fn member_count(&self, channel: &ChannelName) -> usize {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .map(HashMap::len)
            .unwrap_or_default()
    }

    async fn join(
        &self,
        channel: &ChannelName,
        requested: Option<ParticipantId>,
        role: ClientRole,
        events: broadcast::Sender<TransportEvent>,
    ) -> Result<ParticipantId> {
        let mut state = self.state.lock().await;
        let members = state.channels.entry(channel.clone()).or_default();

        let participant_id = match requested.filter(|id| id.0 != 0) {
            Some(id) if members.contains_key(&id) => {
                bail!("participant id {id} is already in channel {channel}")
            }
            Some(id) => id,
            None => loop {
                let candidate = ParticipantId(self.next_id.fetch_add(1, Ordering::SeqCst));
                if !members.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        for (id, member) in members.iter() {
            for kind in &member.published {
                let _ = events.send(TransportEvent::RemotePublished {
                    participant_id: *id,
                    kind: *kind,
                });
            }
        }

        members.insert(
            participant_id,
            Member {
                role,
                published: HashSet::new(),
                events,
            },
        );
        Ok(participant_id)
    }

    async fn leave(&self, channel: &ChannelName, participant_id: ParticipantId) {
        let mut state = self.state.lock().await;
        let removed = state
            .channels
            .get_mut(channel)
            .and_then(|members| members.remove(&participant_id));
        if removed.is_some() {
            state.fan_out(
                channel,
                participant_id,
                TransportEvent::RemoteLeft { participant_id },
            );
        }
        if state
            .channels
            .get(channel)
            .is_some_and(|members| members.is_empty())
        {
            state.channels.remove(channel);
        }
    }

    async fn set_role(&self, channel: &ChannelName, participant_id: ParticipantId, role: ClientRole) {
        let mut state = self.state.lock().await;
        if let Some(member) = state
            .channels
            .get_mut(channel)
            .and_then(|members| members.get_mut(&participant_id))
        {
            member.role = role;
        }
    }

    async fn publish(
        &self,
        channel: &ChannelName,
        participant_id: ParticipantId,
        kinds: &[MediaKind],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let member = state
            .channels
            .get_mut(channel)
            .and_then(|members| members.get_mut(&participant_id))
            .ok_or_else(|| anyhow!("participant {participant_id} is not in channel {channel}"))?;
        if member.role != ClientRole::Host {
            bail!("audience members cannot publish");
        }
        let fresh = kinds
            .iter()
            .copied()
            .filter(|kind| member.published.insert(*kind))
            .collect::<Vec<_>>();
        for kind in fresh {
            state.fan_out(
                channel,
                participant_id,
                TransportEvent::RemotePublished {
                    participant_id,
                    kind,
                },
            );
        }
        Ok(())
    }

    async fn unpublish(&self, channel: &ChannelName, participant_id: ParticipantId, kind: MediaKind) {
        let mut state = self.state.lock().await;
        let removed = state
            .channels
            .get_mut(channel)
            .and_then(|members| members.get_mut(&participant_id))
            .is_some_and(|member| member.published.remove(&kind));
        if removed {
            state.fan_out(
                channel,
                participant_id,
                TransportEvent::RemoteUnpublished {
                    participant_id,
                    kind,
                },
            );
        }
    }

    async fn is_published(
        &self,
        channel: &ChannelName,
        participant_id: ParticipantId,
        kind: MediaKind,
    ) -> bool {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .and_then(|members| members.get(&participant_id))
            .is_some_and(|member| member.published.contains(&kind))
    }

    async fn participants(
        &self,
        channel: &ChannelName,
        except: ParticipantId,
    ) -> Vec<RemoteParticipant> {
        let state = self.state.lock().await;
        let Some(members) = state.channels.get(channel) else {
            return Vec::new();
        };
        let mut participants = members
            .iter()
            .filter(|(id, _)| **id != except)
            .map(|(id, member)| RemoteParticipant {
                participant_id: *id,
                has_audio: member.published.contains(&MediaKind::Audio),
                has_video: member.published.contains(&MediaKind::Video),
            })
            .collect::<Vec<_>>();
        participants.sort_by_key(|participant| participant.participant_id);
        participants
    }
}

struct ClientState {
    role: ClientRole,
    latency: Option<AudienceLatency>,
    joined: Option<(ChannelName, ParticipantId)>,
    connection: ConnectionState,
}

pub struct LoopbackClient {
    hub: Arc<LoopbackHub>,
    config: ClientConfig,
    events: broadcast::Sender<TransportEvent>,
    state: Mutex<ClientState>,
}

impl LoopbackClient {
    pub fn new(hub: Arc<LoopbackHub>, config: ClientConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            hub,
            config,
            events,
            state: Mutex::new(ClientState {
                role: config.role,
                latency: None,
                joined: None,
                connection: ConnectionState::Disconnected,
            }),
        })
    }

    pub fn config(&self) -> ClientConfig {
        self.config
    }

    pub async fn role(&self) -> (ClientRole, Option<AudienceLatency>) {
        let state = self.state.lock().await;
        (state.role, state.latency)
    }

    pub async fn local_id(&self) -> Option<ParticipantId> {
        self.state.lock().await.joined.as_ref().map(|(_, id)| *id)
    }

    /// Withdraws one published kind; co-members observe a remote-unpublished event.
    pub async fn unpublish(&self, kind: MediaKind) -> Result<()> {
        let (channel, id) = self.joined().await?;
        self.hub.unpublish(&channel, id, kind).await;
        Ok(())
    }

    async fn joined(&self) -> Result<(ChannelName, ParticipantId)> {
        self.state
            .lock()
            .await
            .joined
            .clone()
            .ok_or_else(|| anyhow!("client has not joined a channel"))
    }

    fn transition(&self, state: &mut ClientState, next: ConnectionState) {
        let previous = state.connection;
        state.connection = next;
        let _ = self.events.send(TransportEvent::ConnectionStateChanged {
            previous,
            current: next,
        });
    }
}

#[async_trait]
impl TransportClient for LoopbackClient {
    async fn join(&self, options: JoinOptions) -> Result<ParticipantId> {
        let mut state = self.state.lock().await;
        if state.joined.is_some() {
            bail!("client already joined a channel");
        }
        self.transition(&mut state, ConnectionState::Connecting);
        let joined = self
            .hub
            .join(
                &options.channel,
                options.local_id,
                state.role,
                self.events.clone(),
            )
            .await;
        let participant_id = match joined {
            Ok(id) => id,
            Err(err) => {
                self.transition(&mut state, ConnectionState::Disconnected);
                return Err(err);
            }
        };
        info!(
            channel = %options.channel,
            participant_id = participant_id.0,
            token = options.token.is_some(),
            "loopback: joined"
        );
        state.joined = Some((options.channel, participant_id));
        self.transition(&mut state, ConnectionState::Connected);
        Ok(participant_id)
    }

    async fn leave(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some((channel, participant_id)) = state.joined.take() else {
            return Ok(());
        };
        self.transition(&mut state, ConnectionState::Disconnecting);
        self.hub.leave(&channel, participant_id).await;
        self.transition(&mut state, ConnectionState::Disconnected);
        info!(channel = %channel, participant_id = participant_id.0, "loopback: left");
        Ok(())
    }

    async fn set_client_role(
        &self,
        role: ClientRole,
        latency: Option<AudienceLatency>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.role = role;
        state.latency = latency;
        if let Some((channel, id)) = state.joined.clone() {
            self.hub.set_role(&channel, id, role).await;
        }
        Ok(())
    }

    async fn publish(&self, tracks: Vec<Arc<dyn MediaTrack>>) -> Result<()> {
        let (channel, id) = self.joined().await?;
        if let Some(closed) = tracks.iter().find(|track| track.is_closed()) {
            bail!("cannot publish closed {} track", closed.kind());
        }
        let kinds = tracks.iter().map(|track| track.kind()).collect::<Vec<_>>();
        self.hub.publish(&channel, id, &kinds).await
    }

    async fn subscribe(
        &self,
        participant_id: ParticipantId,
        kind: MediaKind,
    ) -> Result<Arc<dyn MediaTrack>> {
        let (channel, _) = self.joined().await?;
        if !self.hub.is_published(&channel, participant_id, kind).await {
            bail!("participant {participant_id} has no published {kind} track");
        }
        Ok(Arc::new(LoopbackTrack::new(
            kind,
            format!("remote-{participant_id}-{kind}"),
        )))
    }

    async fn remote_participants(&self) -> Vec<RemoteParticipant> {
        match self.joined().await {
            Ok((channel, id)) => self.hub.participants(&channel, id).await,
            Err(_) => Vec::new(),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

pub struct LoopbackEngine {
    hub: Arc<LoopbackHub>,
    denied: Mutex<HashSet<MediaKind>>,
    clients_created: AtomicUsize,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::with_hub(LoopbackHub::new())
    }

    pub fn with_hub(hub: Arc<LoopbackHub>) -> Self {
        Self {
            hub,
            denied: Mutex::new(HashSet::new()),
            clients_created: AtomicUsize::new(0),
        }
    }

    pub fn hub(&self) -> Arc<LoopbackHub> {
        Arc::clone(&self.hub)
    }

    pub fn clients_created(&self) -> usize {
        self.clients_created.load(Ordering::SeqCst)
    }

    /// Simulates the platform refusing camera or microphone access.
    pub async fn deny_device(&self, kind: MediaKind) {
        self.denied.lock().await.insert(kind);
    }

    /// Concrete client for callers that need loopback-only controls such as `unpublish`.
    pub fn loopback_client(&self, config: ClientConfig) -> Arc<LoopbackClient> {
        self.clients_created.fetch_add(1, Ordering::SeqCst);
        LoopbackClient::new(Arc::clone(&self.hub), config)
    }

    async fn capture(&self, kind: MediaKind, label: &str) -> Result<Arc<dyn MediaTrack>> {
        if self.denied.lock().await.contains(&kind) {
            return Err(DeviceError::PermissionDenied(kind).into());
        }
        Ok(Arc::new(LoopbackTrack::new(kind, label)))
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    fn create_client(&self, config: ClientConfig) -> Arc<dyn TransportClient> {
        self.loopback_client(config)
    }

    async fn create_microphone_track(&self) -> Result<Arc<dyn MediaTrack>> {
        self.capture(MediaKind::Audio, "microphone").await
    }

    async fn create_camera_track(&self) -> Result<Arc<dyn MediaTrack>> {
        self.capture(MediaKind::Video, "camera").await
    }
}

#[cfg(test)]
#[path = "tests/loopback_tests.rs"]
mod tests;
