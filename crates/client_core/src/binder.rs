//! Routes user actions to the controllers and keeps the control state in step.

use std::sync::Arc;

use shared::domain::ClientRole;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::{
    chat::{ChatController, ChatStatus},
    error::ClientError,
    media::MediaSessionController,
    session::SharedSession,
    surface::{ControlState, RenderSurface},
    ClientEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    JoinAsHost {
        channel: String,
        display_name: String,
    },
    JoinAsAudience {
        channel: String,
        display_name: String,
    },
    Leave,
    SendMessage {
        content: String,
    },
}

pub struct UiBinder {
    media: Arc<MediaSessionController>,
    chat: Arc<ChatController>,
    session: SharedSession,
    surface: Arc<dyn RenderSurface>,
    events: broadcast::Sender<ClientEvent>,
}

impl UiBinder {
    pub fn new(
        media: Arc<MediaSessionController>,
        chat: Arc<ChatController>,
        session: SharedSession,
        surface: Arc<dyn RenderSurface>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            media,
            chat,
            session,
            surface,
            events,
        }
    }

    pub async fn dispatch(&self, action: UiAction) {
        let controls = self.surface.controls();
        match action {
            UiAction::JoinAsHost {
                channel,
                display_name,
            } => {
                if !controls.host_join {
                    debug!("binder: host join disabled");
                    return;
                }
                self.join(ClientRole::Host, &channel, &display_name, controls)
                    .await;
            }
            UiAction::JoinAsAudience {
                channel,
                display_name,
            } => {
                if !controls.audience_join {
                    debug!("binder: audience join disabled");
                    return;
                }
                self.join(ClientRole::Audience, &channel, &display_name, controls)
                    .await;
            }
            UiAction::Leave => {
                if !controls.leave {
                    debug!("binder: leave disabled");
                    return;
                }
                self.leave().await;
            }
            UiAction::SendMessage { content } => self.send(&content).await,
        }
    }

    async fn join(
        &self,
        role: ClientRole,
        channel: &str,
        display_name: &str,
        previous: ControlState,
    ) {
        self.surface.set_controls(ControlState::joining());
        let joined = match role {
            ClientRole::Host => self.media.join_as_host(channel, display_name).await,
            ClientRole::Audience => self.media.join_as_audience(channel, display_name).await,
        };
        if let Err(err) = joined {
            error!(?role, "binder: join failed: {err}");
            self.report(&err);
            self.surface.set_controls(previous);
            return;
        }

        let status = match self.chat.connect(channel, display_name).await {
            Ok(status) => status,
            Err(err) => {
                self.report(&err);
                ChatStatus::Disabled
            }
        };
        self.surface
            .set_controls(ControlState::joined(status == ChatStatus::Connected));
    }

    async fn leave(&self) {
        self.chat.disconnect().await;
        if let Err(err) = self.media.leave().await {
            self.report(&err);
        }
        self.surface.set_controls(ControlState::idle());
    }

    async fn send(&self, content: &str) {
        if content.trim().is_empty() {
            return;
        }
        if !self.session.read().await.is_member() {
            self.report(&ClientError::NotInChannel);
            return;
        }
        self.chat.send(content).await;
    }

    fn report(&self, err: &ClientError) {
        let alert = err.alert();
        self.surface.alert(&alert);
        let _ = self.events.send(ClientEvent::Error(alert));
    }
}

#[cfg(test)]
#[path = "tests/binder_tests.rs"]
mod tests;
