//! Abstract rendering surface the controllers write to.

use chrono::{DateTime, Utc};
use shared::{
    domain::ViewHandle,
    error::Alert,
    protocol::{ChatMessage, NewChatMessage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub host_join: bool,
    pub audience_join: bool,
    pub leave: bool,
    pub send: bool,
}

impl ControlState {
    pub fn idle() -> Self {
        Self {
            host_join: true,
            audience_join: true,
            leave: false,
            send: false,
        }
    }

    /// Everything disabled while a join is in flight.
    pub fn joining() -> Self {
        Self {
            host_join: false,
            audience_join: false,
            leave: false,
            send: false,
        }
    }

    pub fn joined(chat_enabled: bool) -> Self {
        Self {
            host_join: false,
            audience_join: false,
            leave: true,
            send: chat_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRow {
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub local: bool,
}

impl ChatRow {
    pub fn from_message(message: &ChatMessage, local: bool) -> Self {
        Self {
            sender_name: message.sender_name.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            local,
        }
    }

    pub fn echo(message: &NewChatMessage) -> Self {
        Self {
            sender_name: message.sender_name.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            local: true,
        }
    }
}

pub trait RenderSurface: Send + Sync {
    fn create_view(&self, view: ViewHandle, label: &str);
    fn remove_view(&self, view: ViewHandle);
    fn append_message(&self, row: ChatRow);
    fn clear_messages(&self);
    fn system_notice(&self, text: &str);
    fn alert(&self, alert: &Alert);
    fn controls(&self) -> ControlState;
    fn set_controls(&self, controls: ControlState);
}
