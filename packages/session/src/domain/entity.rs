//! Core domain models for the session layer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{
    error::MessageStateError,
    value_object::{LocalId, MessageText, RoomId, Timestamp, UserId},
};

/// Lifecycle of the single physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `Disconnected` is reachable from anywhere (explicit `Disconnect`).
    pub fn allows(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected | Failed, Connecting)
                | (Connecting | Reconnecting, Connected)
                | (Connected, Reconnecting)
                | (Connecting | Reconnecting, Failed)
        )
    }

    /// Sends issued in this state are queued rather than rejected.
    pub fn is_transient(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }
}

/// A logical conversation room multiplexed over the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Room identifier
    pub id: RoomId,
    /// Participants the id was derived from (empty when the id came from elsewhere)
    pub participants: BTreeSet<UserId>,
    /// Whether the client currently considers itself joined
    pub joined: bool,
}

impl Room {
    /// Create a room known only by id
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            participants: BTreeSet::new(),
            joined: false,
        }
    }

    /// Create a room together with its participant set
    pub fn with_participants(id: RoomId, participants: BTreeSet<UserId>) -> Self {
        Self {
            id,
            participants,
            joined: false,
        }
    }
}

/// Delivery progress of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

/// Why a message ended up `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// No `message_ack` within the ack timeout
    Timeout,
    /// Explicit negative ack from the server
    Rejected { code: String, reason: String },
    /// The send was abandoned locally (disconnect, leave, link failure)
    Cancelled,
}

/// A chat message as seen by this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Client-generated id, always present
    pub local_id: LocalId,
    /// Server-assigned id, set once acknowledged
    pub remote_id: Option<String>,
    /// Room the message belongs to
    pub room_id: RoomId,
    /// Author
    pub sender_id: UserId,
    /// Text body
    pub text: Option<MessageText>,
    /// Opaque reference to an uploaded attachment
    pub attachment_ref: Option<String>,
    /// Client send time for own messages, server time for inbound ones
    pub sent_at: Timestamp,
    /// Delivery progress
    pub delivery_state: DeliveryState,
    /// Set when `delivery_state` is `Failed`
    pub failure: Option<DeliveryFailure>,
    /// Set by a read receipt
    pub read: bool,
}

impl Message {
    /// Create an outgoing message in `Pending`
    pub fn outgoing(
        room_id: RoomId,
        sender_id: UserId,
        text: Option<MessageText>,
        attachment_ref: Option<String>,
        sent_at: Timestamp,
    ) -> Self {
        Self {
            local_id: LocalId::generate(),
            remote_id: None,
            room_id,
            sender_id,
            text,
            attachment_ref,
            sent_at,
            delivery_state: DeliveryState::Pending,
            failure: None,
            read: false,
        }
    }

    /// Create a message received from the server (already `Sent`)
    pub fn inbound(
        local_id: LocalId,
        remote_id: String,
        room_id: RoomId,
        sender_id: UserId,
        text: Option<MessageText>,
        attachment_ref: Option<String>,
        sent_at: Timestamp,
    ) -> Self {
        Self {
            local_id,
            remote_id: Some(remote_id),
            room_id,
            sender_id,
            text,
            attachment_ref,
            sent_at,
            delivery_state: DeliveryState::Sent,
            failure: None,
            read: false,
        }
    }

    /// `Pending -> Sent`
    ///
    /// # Errors
    ///
    /// Returns `MessageStateError::NotPending` if the message was already resolved
    pub fn mark_sent(&mut self, remote_id: String) -> Result<(), MessageStateError> {
        self.ensure_pending()?;
        self.remote_id = Some(remote_id);
        self.delivery_state = DeliveryState::Sent;
        Ok(())
    }

    /// `Pending -> Failed`
    ///
    /// # Errors
    ///
    /// Returns `MessageStateError::NotPending` if the message was already resolved
    pub fn mark_failed(&mut self, failure: DeliveryFailure) -> Result<(), MessageStateError> {
        self.ensure_pending()?;
        self.failure = Some(failure);
        self.delivery_state = DeliveryState::Failed;
        Ok(())
    }

    /// Set the read flag, the only change allowed once `Sent`
    ///
    /// # Errors
    ///
    /// Returns `MessageStateError::NotSent` unless the message is `Sent`
    pub fn mark_read(&mut self) -> Result<(), MessageStateError> {
        if self.delivery_state != DeliveryState::Sent {
            return Err(MessageStateError::NotSent {
                current: self.delivery_state,
            });
        }
        self.read = true;
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), MessageStateError> {
        if self.delivery_state != DeliveryState::Pending {
            return Err(MessageStateError::NotPending {
                current: self.delivery_state,
            });
        }
        Ok(())
    }
}

/// Remote "is typing" signal; absent once `expires_at` has passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub expires_at: Instant,
}

impl TypingSignal {
    /// Create a signal
    pub fn new(room_id: RoomId, user_id: UserId, expires_at: Instant) -> Self {
        Self {
            room_id,
            user_id,
            expires_at,
        }
    }

    /// Whether the signal is still live at `now`
    pub fn is_active(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}
