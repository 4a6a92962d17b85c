//! Channel chat: history load, live insert feed, local echo and send.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::ChannelName,
    protocol::{ChatMessage, MessageIdentity, NewChatMessage},
};
use storage::{InsertSubscription, MessageStore, SubscriptionEvent};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    session::SharedSession,
    surface::{ChatRow, RenderSurface},
    ClientEvent,
};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Connected,
    /// No reachable store; sending stays disabled for this session.
    Disabled,
    Disconnected,
}

struct ActiveChat {
    channel: ChannelName,
    display_name: String,
    delivery: JoinHandle<()>,
}

enum ChatSlot {
    Live(ActiveChat),
    /// Joined a channel whose chat could not start.
    Disabled { channel: ChannelName },
}

impl ChatSlot {
    fn channel(&self) -> &ChannelName {
        match self {
            Self::Live(active) => &active.channel,
            Self::Disabled { channel } => channel,
        }
    }
}

pub struct ChatController {
    store: Option<Arc<dyn MessageStore>>,
    session: SharedSession,
    surface: Arc<dyn RenderSurface>,
    events: broadcast::Sender<ClientEvent>,
    active: Mutex<Option<ChatSlot>>,
    history_limit: u32,
    reconnect_delay: Duration,
}

impl ChatController {
    pub fn new(
        store: Option<Arc<dyn MessageStore>>,
        session: SharedSession,
        surface: Arc<dyn RenderSurface>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            store,
            session,
            surface,
            events,
            active: Mutex::new(None),
            history_limit: DEFAULT_HISTORY_LIMIT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Subscribes to the channel feed, renders history, then starts live delivery.
    ///
    /// The feed is opened before history is fetched and buffers meanwhile, so
    /// inserts landing between the two are delivered instead of lost. Any
    /// buffered record already shown from history is skipped.
    pub async fn connect(
        &self,
        channel: &str,
        display_name: &str,
    ) -> Result<ChatStatus, ClientError> {
        let sender_id = {
            let session = self.session.read().await;
            if !session.is_member() {
                return Err(ClientError::NotInChannel);
            }
            session.sender_id().to_string()
        };
        let channel = ChannelName::parse(channel)?;

        let mut active = self.active.lock().await;
        if let Some(ChatSlot::Live(previous)) = active.take() {
            debug!(channel = %previous.channel, "chat: replacing subscription");
            previous.delivery.abort();
        }

        let store = match self.usable_store().await {
            Ok(store) => store,
            Err(err) => {
                *active = Some(ChatSlot::Disabled { channel });
                return Ok(self.disable(err));
            }
        };
        let subscription = match store.subscribe_inserts(&channel).await {
            Ok(subscription) => subscription,
            Err(err) => {
                *active = Some(ChatSlot::Disabled { channel });
                return Ok(self.disable(ClientError::StoreUnavailable(format!("{err:#}"))));
            }
        };

        let history = match store.history(&channel, self.history_limit).await {
            Ok(history) => history,
            Err(err) => {
                warn!(channel = %channel, "chat: history load failed: {err:#}");
                Vec::new()
            }
        };
        let mut shown = HashSet::with_capacity(history.len());
        for message in &history {
            shown.insert(message.identity());
            let local = message.sender_id == sender_id;
            self.surface
                .append_message(ChatRow::from_message(message, local));
        }

        let delivery = LiveDelivery {
            store,
            surface: Arc::clone(&self.surface),
            channel: channel.clone(),
            sender_id,
            shown_in_history: shown,
            reconnect_delay: self.reconnect_delay,
        };
        info!(channel = %channel, history = history.len(), "chat: connected");
        *active = Some(ChatSlot::Live(ActiveChat {
            channel,
            display_name: display_name.trim().to_string(),
            delivery: tokio::spawn(delivery.run(subscription)),
        }));

        let _ = self
            .events
            .send(ClientEvent::ChatStatusChanged(ChatStatus::Connected));
        Ok(ChatStatus::Connected)
    }

    async fn usable_store(&self) -> Result<Arc<dyn MessageStore>, ClientError> {
        let Some(store) = self.store.as_ref() else {
            return Err(ClientError::StoreUnavailable(
                "no message store configured".to_string(),
            ));
        };
        if !store.is_available().await {
            return Err(ClientError::StoreUnavailable(
                "message store unreachable or messages table missing".to_string(),
            ));
        }
        Ok(Arc::clone(store))
    }

    fn disable(&self, err: ClientError) -> ChatStatus {
        warn!("chat: {err}");
        self.surface.system_notice(&err.to_string());
        let _ = self
            .events
            .send(ClientEvent::ChatStatusChanged(ChatStatus::Disabled));
        ChatStatus::Disabled
    }

    /// Drops the live feed and clears the rendered list. Safe to repeat.
    pub async fn disconnect(&self) {
        let Some(slot) = self.active.lock().await.take() else {
            return;
        };
        if let ChatSlot::Live(active) = &slot {
            active.delivery.abort();
        }
        self.surface.clear_messages();
        self.surface
            .system_notice(&format!("Left chat #{}", slot.channel()));
        info!(channel = %slot.channel(), "chat: disconnected");
        let _ = self
            .events
            .send(ClientEvent::ChatStatusChanged(ChatStatus::Disconnected));
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.active.lock().await, Some(ChatSlot::Live(_)))
    }

    /// Echoes locally, then persists. Returns whether the store accepted it.
    pub async fn send(&self, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        let sender_id = {
            let session = self.session.read().await;
            if !session.is_member() {
                debug!("chat: send ignored outside a channel");
                return false;
            }
            session.sender_id().to_string()
        };
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let (channel, sender_name) = match self.active.lock().await.as_ref() {
            Some(ChatSlot::Live(active)) => (active.channel.clone(), active.display_name.clone()),
            _ => return false,
        };

        let message = NewChatMessage {
            channel,
            content: content.to_string(),
            sender_id,
            sender_name,
            created_at: Utc::now(),
        };
        self.surface.append_message(ChatRow::echo(&message));

        match store.insert(message).await {
            Ok(stored) => {
                debug!(id = ?stored.id, "chat: message stored");
                true
            }
            Err(err) => {
                let err = ClientError::SendFailure(format!("{err:#}"));
                warn!("chat: {err}");
                self.surface.system_notice(&err.to_string());
                false
            }
        }
    }
}

struct LiveDelivery {
    store: Arc<dyn MessageStore>,
    surface: Arc<dyn RenderSurface>,
    channel: ChannelName,
    sender_id: String,
    shown_in_history: HashSet<MessageIdentity>,
    reconnect_delay: Duration,
}

impl LiveDelivery {
    async fn run(mut self, mut subscription: InsertSubscription) {
        let mut reconnected = false;
        loop {
            let reason = match subscription.recv().await {
                Some(SubscriptionEvent::Inserted(message)) => {
                    self.render(message);
                    continue;
                }
                Some(SubscriptionEvent::Closed { reason }) => reason,
                None => "subscription ended".to_string(),
            };

            if reconnected {
                debug!(channel = %self.channel, %reason, "chat: feed dropped again, giving up");
                return;
            }
            reconnected = true;
            warn!(channel = %self.channel, %reason, "chat: feed dropped, retrying once");
            tokio::time::sleep(self.reconnect_delay).await;
            subscription = match self.store.subscribe_inserts(&self.channel).await {
                Ok(next) => next,
                Err(err) => {
                    debug!(channel = %self.channel, "chat: resubscribe failed: {err:#}");
                    return;
                }
            };
        }
    }

    fn render(&mut self, message: ChatMessage) {
        // already shown as a local echo
        if message.sender_id == self.sender_id {
            return;
        }
        if self.shown_in_history.remove(&message.identity()) {
            return;
        }
        self.surface
            .append_message(ChatRow::from_message(&message, false));
    }
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
