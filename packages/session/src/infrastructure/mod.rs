//! Infrastructure layer
//!
//! Wire protocol DTOs and the transports that carry them. The session layer
//! depends on the [`transport::Connector`] / [`transport::Transport`] traits
//! only, never on a concrete implementation.

pub mod dto;
pub mod error;
pub mod transport;

pub use error::{ProtocolDecodeError, TransportError};
