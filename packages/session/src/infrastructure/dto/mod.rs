//! Data transfer objects for the wire protocol.

pub mod wire;

pub use wire::{
    ClientEvent, EventKind, MessageAckPayload, MessageReadPayload, MessageRejectedPayload,
    NewMessagePayload, PresencePayload, RoomPayload, SendMessagePayload, ServerEvent,
    TypingPayload,
};
