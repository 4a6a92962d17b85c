use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::ChannelName,
    protocol::{ChatMessage, NewChatMessage},
};
use tokio::{sync::mpsc, task::JoinHandle};

mod hosted;
mod sqlite;

pub use hosted::{HostedMessageStore, HostedStoreConfig};
pub use sqlite::SqliteMessageStore;

pub const DEFAULT_MESSAGES_TABLE: &str = "messages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Inserted(ChatMessage),
    /// The feed dropped or errored; no further events follow.
    Closed { reason: String },
}

/// Live feed of inserts for one channel. Dropping it tears the feed down.
pub struct InsertSubscription {
    channel: ChannelName,
    events: mpsc::Receiver<SubscriptionEvent>,
    task: JoinHandle<()>,
}

impl InsertSubscription {
    pub fn new(
        channel: ChannelName,
        events: mpsc::Receiver<SubscriptionEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            channel,
            events,
            task,
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }
}

impl Drop for InsertSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Whether the store is reachable and the messages collection exists.
    async fn is_available(&self) -> bool;
    async fn insert(&self, message: NewChatMessage) -> Result<ChatMessage>;
    /// Oldest-first history for a channel, at most `limit` records.
    async fn history(&self, channel: &ChannelName, limit: u32) -> Result<Vec<ChatMessage>>;
    async fn subscribe_inserts(&self, channel: &ChannelName) -> Result<InsertSubscription>;
}
