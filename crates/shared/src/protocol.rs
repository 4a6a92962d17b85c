use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ChannelName;

/// Chat record as stored in the `messages` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub channel: ChannelName,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
}

/// Record submitted by `MessageStore::insert`; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub channel: ChannelName,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
}

impl NewChatMessage {
    pub fn into_stored(self, id: Option<i64>) -> ChatMessage {
        ChatMessage {
            id,
            channel: self.channel,
            content: self.content,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            created_at: self.created_at,
        }
    }
}

impl ChatMessage {
    /// Key used to recognise the same record arriving via history and live push.
    pub fn identity(&self) -> MessageIdentity {
        match self.id {
            Some(id) => MessageIdentity::Id(id),
            None => MessageIdentity::Content {
                sender_id: self.sender_id.clone(),
                created_at: self.created_at,
                content: self.content.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageIdentity {
    Id(i64),
    Content {
        sender_id: String,
        created_at: DateTime<Utc>,
        content: String,
    },
}
