use std::fmt;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc2822};

/// Rooms are keyed by their database row id.
pub type RoomId = i64;

/// Tag carried in the `type` field of every chat frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    #[default]
    User,
    BotResponse,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::User => "user",
            MessageKind::BotResponse => "botResponse",
            MessageKind::Error => "error",
            MessageKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MessageKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "user" => MessageKind::User,
            "botResponse" => MessageKind::BotResponse,
            "error" => MessageKind::Error,
            _ => MessageKind::Other(kind),
        }
    }
}

/// A chat frame as it travels between clients, the hub and bot workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl MessagePayload {
    pub fn error(room_id: RoomId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: MessageKind::Error,
            room_id: Some(room_id),
            ..Default::default()
        }
    }

    pub fn bot_response(room_id: RoomId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: MessageKind::BotResponse,
            room_id: Some(room_id),
            ..Default::default()
        }
    }
}

/// Timestamps on frames use RFC 2822, e.g. `Fri, 02 May 2025 10:04:05 +0000`.
pub fn rfc2822(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc2822).ok()
}

pub fn now_rfc2822() -> Option<String> {
    rfc2822(OffsetDateTime::now_utc())
}

/// Request published to bot workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotCommandPayload {
    pub command: String,
    pub argument: String,
    pub room_id: RoomId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesPayload {
    pub messages: Vec<MessagePayload>,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPayload {
    pub id: RoomId,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomsPayload {
    pub rooms: Vec<RoomPayload>,
    pub size: usize,
}
