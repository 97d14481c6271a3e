//! WebSocket wire events for the session protocol.
//!
//! Every frame is a JSON text frame of the form
//! `{"event": "<name>", "data": {...}}` with camelCase payload fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    domain::{LocalId, RoomId, Timestamp, UserId},
    infrastructure::error::ProtocolDecodeError,
};

/// Names of inbound events, used as subscription keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageAck,
    MessageRejected,
    NewMessage,
    Typing,
    MessageRead,
    Presence,
}

impl EventKind {
    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MessageAck => "message_ack",
            EventKind::MessageRejected => "message_rejected",
            EventKind::NewMessage => "new_message",
            EventKind::Typing => "typing",
            EventKind::MessageRead => "message_read",
            EventKind::Presence => "presence",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(RoomPayload),
    LeaveRoom(RoomPayload),
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
}

impl ClientEvent {
    /// Serialize into a text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire name of the event, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::Typing(_) => "typing",
        }
    }

    /// Room the event is scoped to
    pub fn room_id(&self) -> &RoomId {
        match self {
            ClientEvent::JoinRoom(p) | ClientEvent::LeaveRoom(p) => &p.room_id,
            ClientEvent::SendMessage(p) => &p.room_id,
            ClientEvent::Typing(p) => &p.room_id,
        }
    }
}

/// Events sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageAck(MessageAckPayload),
    MessageRejected(MessageRejectedPayload),
    NewMessage(NewMessagePayload),
    Typing(TypingPayload),
    MessageRead(MessageReadPayload),
    Presence(PresencePayload),
}

impl ServerEvent {
    /// Parse a text frame
    pub fn decode(frame: &str) -> Result<Self, ProtocolDecodeError> {
        serde_json::from_str(frame).map_err(|e| ProtocolDecodeError::new(frame, e))
    }

    /// Serialize into a text frame (server side of tests and fixtures)
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Subscription key of the event
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::MessageAck(_) => EventKind::MessageAck,
            ServerEvent::MessageRejected(_) => EventKind::MessageRejected,
            ServerEvent::NewMessage(_) => EventKind::NewMessage,
            ServerEvent::Typing(_) => EventKind::Typing,
            ServerEvent::MessageRead(_) => EventKind::MessageRead,
            ServerEvent::Presence(_) => EventKind::Presence,
        }
    }
}

/// `join_room` / `leave_room`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: RoomId,
}

/// `send_message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: RoomId,
    pub local_id: LocalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub timestamp: Timestamp,
}

/// `message_ack`, correlated by `local_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAckPayload {
    pub local_id: LocalId,
    pub remote_id: String,
    pub timestamp: Timestamp,
}

/// `message_rejected`, an explicit negative ack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRejectedPayload {
    pub local_id: LocalId,
    pub code: String,
    #[serde(default)]
    pub reason: String,
}

/// `new_message`
///
/// `local_id` is only present when the server echoes a message back to the
/// identity that authored it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub remote_id: String,
    pub room_id: RoomId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub timestamp: Timestamp,
}

/// `typing`, in both directions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// `message_read`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub room_id: RoomId,
    pub message_id: String,
    pub reader_id: UserId,
}

/// `presence`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
    pub online: bool,
}
