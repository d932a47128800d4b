use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id of the channel seeded by the initial migration. Every new user joins it.
pub const GENERAL_CHANNEL_ID: Uuid = Uuid::from_u128(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// The `{id, name}` shape returned by `GET /api/v1/channels/my`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: Uuid,
    pub name: String,
}

impl From<Channel> for ChannelSummary {
    fn from(channel: Channel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
        }
    }
}

/// A persisted chat message.
///
/// This is the one message schema of the system: REST responses, live socket
/// frames and resume replays all serialize exactly this struct. `seq` is the
/// position of the message in its channel, starting at 1 with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub seq: u64,
    pub sender_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub text: String,
    pub params: Option<serde_json::Value>,
    pub widget: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A validated message that has not been assigned an id or sequence number yet.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub channel_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub text: String,
    pub params: Option<serde_json::Value>,
    pub widget: Option<serde_json::Value>,
}

impl MessageDraft {
    pub fn text(channel_id: Uuid, sender_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            channel_id,
            sender_id,
            recipient_id: None,
            text: text.into(),
            params: None,
            widget: None,
        }
    }
}
