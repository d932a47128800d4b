//! Database row types. These map directly to SQLite rows and are kept apart
//! from the courier-types wire models; the `into_*` conversions do the parsing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::models::{Channel, Message, User};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            email: self.email,
            name: self.name,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub created_at: String,
}

impl ChannelRow {
    pub fn into_channel(self) -> Result<Channel> {
        Ok(Channel {
            id: parse_uuid(&self.id)?,
            name: self.name,
            owner_id: self.owner_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub seq: i64,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub text: String,
    pub params: Option<String>,
    pub widget: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_uuid(&self.id)?,
            channel_id: parse_uuid(&self.channel_id)?,
            seq: u64::try_from(self.seq).with_context(|| format!("negative seq on message {}", self.id))?,
            sender_id: parse_uuid(&self.sender_id)?,
            recipient_id: self.recipient_id.as_deref().map(parse_uuid).transpose()?,
            text: self.text,
            params: self.params.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose()?,
            widget: self.widget.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt uuid '{}'", raw))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone suffix
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}
