//! Realtime messaging session layer.
//!
//! Keeps one WebSocket connection per logged-in identity, multiplexes chat
//! rooms over it, and reconciles optimistically sent messages with server
//! acknowledgements. Start with [`ChatClient`].

pub mod client;
pub mod domain;
pub mod infrastructure;
pub mod session;

// Re-export entry points
pub use client::ChatClient;
pub use domain::{
    ConnectionState, DeliveryFailure, DeliveryState, IdentityProvider, LocalId, Message, Room,
    RoomId, StaticIdentity, UserId, room_id_for,
};
pub use infrastructure::{
    dto::{EventKind, ServerEvent},
    transport::{Connector, MemoryConnector, Transport, WebSocketConnector},
};
pub use session::{
    BackoffPolicy, ConnectionError, MessageEvent, MessageSession, SendError, SessionConfig,
    SubscriptionHandle,
};
