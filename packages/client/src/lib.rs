//! Terminal client for Chatlink.
//!
//! Reads commands and messages from the prompt, drives a
//! [`chatlink_session::ChatClient`] over WebSocket and prints room activity.

pub mod app;
pub mod args;
pub mod command;
pub mod error;

pub use app::run_client;
pub use args::Args;
pub use error::{ClientError, CommandError};
