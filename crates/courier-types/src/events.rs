use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::CreateMessageRequest;

/// Commands sent FROM client TO server over WebSocket.
///
/// Server-to-client frames are always a serialized `models::Message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Replay every message of `channel_id` with a sequence number greater
    /// than `after_seq`, then continue with live delivery.
    Resume { channel_id: Uuid, after_seq: u64 },
}

/// Classification of one inbound text frame.
#[derive(Debug)]
pub enum InboundFrame {
    Command(GatewayCommand),
    /// A message-shaped payload. The browser client echoes what it already
    /// posted over REST, so these are acknowledged and otherwise ignored.
    Echo(CreateMessageRequest),
    Malformed(String),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Self::Malformed(e.to_string()),
        };

        if value.get("type").is_some() {
            return match serde_json::from_value::<GatewayCommand>(value) {
                Ok(cmd) => Self::Command(cmd),
                Err(e) => Self::Malformed(e.to_string()),
            };
        }

        match serde_json::from_value::<CreateMessageRequest>(value) {
            Ok(req) if req.channel_id.is_some() && req.text.is_some() => Self::Echo(req),
            Ok(_) => Self::Malformed("not a command or message payload".into()),
            Err(e) => Self::Malformed(e.to_string()),
        }
    }
}
