//! Session layer error definitions.

use thiserror::Error;

use crate::{
    domain::{LocalId, RoomId, ValueObjectError},
    infrastructure::TransportError,
};

/// Connection level failures; fatal until `connect` is called again
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The server could not be reached
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The identity was refused at connection time
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// No `Connected` within the connect timeout; retries continue in the background
    #[error("timed out waiting for the connection")]
    Timeout,

    /// Reconnect attempts exhausted
    #[error("connection failed after {attempts} attempts")]
    Failed { attempts: u32 },

    /// No connection and none being established
    #[error("not connected")]
    NotConnected,

    /// Too many sends queued while the link is down
    #[error("send queue full ({capacity} messages waiting for the connection)")]
    QueueFull { capacity: usize },
}

impl From<TransportError> for ConnectionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Rejected(reason) => ConnectionError::AuthRejected(reason),
            other => ConnectionError::Unreachable(other.to_string()),
        }
    }
}

/// Errors returned synchronously by a send request
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The room has not been joined
    #[error("room {0} is not joined")]
    NotJoined(RoomId),

    /// Neither text nor attachment
    #[error("a message needs text or an attachment")]
    Empty,

    #[error("invalid message text: {0}")]
    InvalidText(#[from] ValueObjectError),

    /// No message with this local id in the room
    #[error("unknown message {0}")]
    UnknownMessage(LocalId),

    /// Only failed messages can be resent
    #[error("message {0} has not failed")]
    NotFailed(LocalId),
}
