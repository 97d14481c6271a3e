//! Domain layer for the session core.
//!
//! This module contains the value objects, entities and collaborator traits
//! that are independent of the wire format and of the transport.

pub mod entity;
pub mod error;
pub mod factory;
pub mod identity;
pub mod value_object;

pub use entity::{ConnectionState, DeliveryFailure, DeliveryState, Message, Room, TypingSignal};
pub use error::{MessageStateError, ValueObjectError};
pub use factory::{RoomIdFactory, room_id_for};
pub use identity::{IdentityProvider, StaticIdentity};
pub use value_object::{LocalId, MessageText, RoomId, Timestamp, UserId};
