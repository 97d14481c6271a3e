//! CLI error definitions.

use chatlink_session::{ConnectionError, SendError, domain::ValueObjectError};
use thiserror::Error;

/// Errors that end the CLI
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid user id: {0}")]
    InvalidUser(#[from] ValueObjectError),

    #[error("could not connect: {0}")]
    Connection(#[from] ConnectionError),

    #[error("terminal error: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),
}

/// Errors for a single input line; reported and the prompt continues
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: /{0}")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    MissingArgument(&'static str),

    #[error("invalid user id {id:?}: {source}")]
    InvalidUser {
        id: String,
        #[source]
        source: ValueObjectError,
    },

    #[error("invalid room: {0}")]
    InvalidRoom(#[from] ValueObjectError),

    #[error("not in a room, use /join <user>... first")]
    NoRoom,

    #[error(transparent)]
    Send(#[from] SendError),
}
