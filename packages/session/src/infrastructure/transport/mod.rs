//! Transport seam.
//!
//! The session layer only ever sees text frames. A [`Connector`] opens one
//! physical link per call, presenting the identity as connection-time
//! metadata; the resulting [`Transport`] is owned by exactly one task.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;

use crate::domain::UserId;

use super::error::TransportError;

pub use memory::{ConnectScript, MemoryConnector, ServerLink, ServerPeer};
pub use websocket::{WebSocketConnector, WebSocketTransport};

/// One established, bidirectional link
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next inbound text frame; `None` once the peer closed the link.
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the link gracefully
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for links, called once per (re)connect attempt
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link authenticated as `identity`
    async fn connect(&self, identity: &UserId) -> Result<Box<dyn Transport>, TransportError>;
}
