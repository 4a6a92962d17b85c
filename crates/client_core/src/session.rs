use std::sync::Arc;

use shared::domain::{ChannelName, ClientRole, ParticipantId};
use tokio::sync::RwLock;
use uuid::Uuid;

pub type SharedSession = Arc<RwLock<Session>>;

/// Identity and membership of the running client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    role: Option<ClientRole>,
    local_id: Option<ParticipantId>,
    channel: Option<ChannelName>,
    display_name: String,
    sender_id: String,
}

impl Session {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            role: None,
            local_id: None,
            channel: None,
            display_name: display_name.into(),
            sender_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn shared(display_name: impl Into<String>) -> SharedSession {
        Arc::new(RwLock::new(Self::new(display_name)))
    }

    pub fn role(&self) -> Option<ClientRole> {
        self.role
    }

    pub fn is_member(&self) -> bool {
        self.role.is_some()
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    pub fn channel(&self) -> Option<&ChannelName> {
        self.channel.as_ref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Chat sender id; stable for the lifetime of the process.
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub(crate) fn enter(
        &mut self,
        role: ClientRole,
        local_id: ParticipantId,
        channel: ChannelName,
        display_name: Option<&str>,
    ) {
        self.role = Some(role);
        self.local_id = Some(local_id);
        self.channel = Some(channel);
        if let Some(name) = display_name.map(str::trim).filter(|name| !name.is_empty()) {
            self.display_name = name.to_string();
        }
    }

    pub(crate) fn reset(&mut self) {
        self.role = None;
        self.local_id = None;
        self.channel = None;
    }
}
