use std::{sync::Arc, time::Duration};

use media_transport::{MediaEngine, TokenProvider};
use shared::{
    domain::{ConnectionState, RemoteParticipant},
    error::Alert,
};
use storage::MessageStore;
use tokio::sync::broadcast;
use tracing::info;

pub mod binder;
pub mod chat;
pub mod config;
pub mod error;
pub mod media;
pub mod session;
pub mod surface;
pub mod views;

pub use binder::{UiAction, UiBinder};
pub use chat::{ChatController, ChatStatus};
pub use error::ClientError;
pub use media::MediaSessionController;
pub use session::{Session, SharedSession};
pub use surface::{ChatRow, ControlState, RenderSurface};
pub use views::{ViewOwner, ViewRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// `None` once the client is back outside a channel.
    SessionChanged(Option<Session>),
    RemoteParticipantsUpdated(Vec<RemoteParticipant>),
    ConnectionStateChanged(ConnectionState),
    ChatStatusChanged(ChatStatus),
    Error(Alert),
}

pub struct ClientDependencies {
    pub engine: Arc<dyn MediaEngine>,
    pub tokens: Arc<dyn TokenProvider>,
    /// `None` runs without chat.
    pub store: Option<Arc<dyn MessageStore>>,
    pub surface: Arc<dyn RenderSurface>,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub app_id: String,
    pub display_name: String,
    pub history_limit: u32,
    pub reconnect_delay: Duration,
}

impl ClientOptions {
    pub fn from_settings(settings: &config::Settings) -> Self {
        Self {
            app_id: settings.app_id.clone(),
            display_name: settings.display_name.clone(),
            history_limit: settings.history_limit,
            reconnect_delay: chat::RECONNECT_DELAY,
        }
    }
}

/// Owns the shared session and wires the controllers together.
pub struct LiveClient {
    session: SharedSession,
    views: Arc<ViewRegistry>,
    media: Arc<MediaSessionController>,
    chat: Arc<ChatController>,
    binder: UiBinder,
    surface: Arc<dyn RenderSurface>,
    events: broadcast::Sender<ClientEvent>,
}

impl LiveClient {
    pub fn new(options: ClientOptions, dependencies: ClientDependencies) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let session = Session::shared(options.display_name);
        let views = Arc::new(ViewRegistry::new(Arc::clone(&dependencies.surface)));
        let media = MediaSessionController::new(
            dependencies.engine,
            dependencies.tokens,
            options.app_id,
            Arc::clone(&session),
            Arc::clone(&views),
            events.clone(),
        );
        let chat = Arc::new(
            ChatController::new(
                dependencies.store,
                Arc::clone(&session),
                Arc::clone(&dependencies.surface),
                events.clone(),
            )
            .with_history_limit(options.history_limit)
            .with_reconnect_delay(options.reconnect_delay),
        );
        let binder = UiBinder::new(
            Arc::clone(&media),
            Arc::clone(&chat),
            Arc::clone(&session),
            Arc::clone(&dependencies.surface),
            events.clone(),
        );

        Arc::new(Self {
            session,
            views,
            media,
            chat,
            binder,
            surface: dependencies.surface,
            events,
        })
    }

    /// Prepares the transport and enables the join controls.
    pub async fn start(&self) {
        self.media.initialize().await;
        self.surface.set_controls(ControlState::idle());
        info!("client: ready");
    }

    pub async fn dispatch(&self, action: UiAction) {
        self.binder.dispatch(action).await;
    }

    pub async fn shutdown(&self) {
        self.chat.disconnect().await;
        self.media.shutdown().await;
        self.surface.set_controls(ControlState::idle());
        info!("client: shut down");
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub fn media(&self) -> &Arc<MediaSessionController> {
        &self.media
    }

    pub fn chat(&self) -> &Arc<ChatController> {
        &self.chat
    }

    pub fn views(&self) -> &Arc<ViewRegistry> {
        &self.views
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
