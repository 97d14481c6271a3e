//! Shared utilities for Chatlink.
//!
//! Logger setup and timestamp helpers used by both the session library and
//! the CLI client.

pub mod logger;
pub mod time;
