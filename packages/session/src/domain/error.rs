//! Domain layer error definitions.

use thiserror::Error;

use super::entity::DeliveryState;

/// Errors related to Value Objects validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueObjectError {
    /// UserId validation error
    #[error("UserId cannot be empty")]
    UserIdEmpty,

    /// UserId too long error
    #[error("UserId cannot exceed {max} characters (got {actual})")]
    UserIdTooLong { max: usize, actual: usize },

    /// UserId contains a control character
    #[error("UserId cannot contain control characters")]
    UserIdInvalidCharacter,

    /// RoomId validation error
    #[error("RoomId cannot be empty")]
    RoomIdEmpty,

    /// RoomId too long error
    #[error("RoomId cannot exceed {max} characters (got {actual})")]
    RoomIdTooLong { max: usize, actual: usize },

    /// Room derivation without any participant
    #[error("RoomId cannot be derived from an empty participant set")]
    NoParticipants,

    /// LocalId is not a UUID
    #[error("LocalId must be a valid UUID (got: {0})")]
    LocalIdInvalidFormat(String),

    /// MessageText validation error
    #[error("MessageText cannot be empty")]
    MessageTextEmpty,

    /// MessageText too long error
    #[error("MessageText cannot exceed {max} characters (got {actual})")]
    MessageTextTooLong { max: usize, actual: usize },
}

/// Errors related to the delivery state machine of a message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageStateError {
    /// Sent/Failed are terminal
    #[error("message is no longer pending (current: {current:?})")]
    NotPending { current: DeliveryState },

    /// Only acknowledged messages carry a read flag
    #[error("only sent messages can be marked as read (current: {current:?})")]
    NotSent { current: DeliveryState },
}
