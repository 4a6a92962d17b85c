use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{
    AudienceLatency, ChannelName, ClientRole, ConnectionState, MediaKind, ParticipantId,
    RemoteParticipant, TransportMode, VideoCodec, ViewHandle,
};
use tokio::sync::broadcast;

pub mod loopback;
pub mod token;

pub use token::{NoTokenProvider, SharedSecretTokenProvider, TokenError, TokenProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub mode: TransportMode,
    pub codec: VideoCodec,
    pub role: ClientRole,
}

impl ClientConfig {
    /// Bidirectional live session with a fixed VP8 codec.
    pub fn live_broadcast() -> Self {
        Self {
            mode: TransportMode::Live,
            codec: VideoCodec::Vp8,
            role: ClientRole::Host,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    pub app_id: String,
    pub channel: ChannelName,
    /// `None` when the remote project has authentication disabled.
    pub token: Option<String>,
    /// `None` lets the transport assign an id.
    pub local_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    RemotePublished {
        participant_id: ParticipantId,
        kind: MediaKind,
    },
    RemoteUnpublished {
        participant_id: ParticipantId,
        kind: MediaKind,
    },
    RemoteLeft {
        participant_id: ParticipantId,
    },
    ConnectionStateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("permission denied for {0} capture")]
    PermissionDenied(MediaKind),
    #[error("no {0} capture device available")]
    NotFound(MediaKind),
}

/// A local capture track or a subscribed remote track.
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> MediaKind;
    /// Starts rendering. Video tracks need a target view, audio tracks play without one.
    fn play(&self, target: Option<ViewHandle>) -> anyhow::Result<()>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn join(&self, options: JoinOptions) -> anyhow::Result<ParticipantId>;
    async fn leave(&self) -> anyhow::Result<()>;
    async fn set_client_role(
        &self,
        role: ClientRole,
        latency: Option<AudienceLatency>,
    ) -> anyhow::Result<()>;
    async fn publish(&self, tracks: Vec<Arc<dyn MediaTrack>>) -> anyhow::Result<()>;
    async fn subscribe(
        &self,
        participant_id: ParticipantId,
        kind: MediaKind,
    ) -> anyhow::Result<Arc<dyn MediaTrack>>;
    async fn remote_participants(&self) -> Vec<RemoteParticipant>;
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn create_client(&self, config: ClientConfig) -> Arc<dyn TransportClient>;
    async fn create_microphone_track(&self) -> anyhow::Result<Arc<dyn MediaTrack>>;
    async fn create_camera_track(&self) -> anyhow::Result<Arc<dyn MediaTrack>>;
}
