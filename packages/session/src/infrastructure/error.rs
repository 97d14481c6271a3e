//! Infrastructure layer error definitions.

use thiserror::Error;

/// Maximum number of raw frame characters kept in a decode error
const RAW_PREVIEW_LEN: usize = 120;

/// Errors raised by a [`Transport`](super::transport::Transport) or
/// [`Connector`](super::transport::Connector)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server could not be reached (DNS, TCP, TLS, timeout)
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server refused the identity presented at connection time
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// The link is gone
    #[error("connection closed")]
    Closed,

    /// Any other I/O or protocol failure on an established link
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Rejections are final until the caller connects again explicitly.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Rejected(_))
    }
}

/// A malformed inbound frame; logged and dropped at the decode boundary
#[derive(Debug, Error)]
#[error("failed to decode inbound frame ({source}): {raw}")]
pub struct ProtocolDecodeError {
    /// Truncated copy of the offending frame
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

impl ProtocolDecodeError {
    pub(crate) fn new(frame: &str, source: serde_json::Error) -> Self {
        let raw = if frame.chars().count() > RAW_PREVIEW_LEN {
            let mut preview: String = frame.chars().take(RAW_PREVIEW_LEN).collect();
            preview.push('…');
            preview
        } else {
            frame.to_string()
        };
        Self { raw, source }
    }
}
