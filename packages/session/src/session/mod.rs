//! Session layer: the connection driver and the components built on it.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod registry;
pub mod typing;

pub use config::{BackoffPolicy, SessionConfig};
pub use connection::{StateListenerHandle, TransportConnection};
pub use dispatcher::{EventDispatcher, SubscriptionHandle};
pub use error::{ConnectionError, SendError};
pub use message::{MessageEvent, MessageSession};
pub use registry::RoomRegistry;
pub use typing::TypingCoordinator;
