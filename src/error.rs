//! Error types for Clutch
//!
//! Centralized error handling using thiserror. Codec failures live in
//! [`ParseError`]; everything a caller of the controller can see is a
//! [`ClutchError`].

use thiserror::Error;

/// Failures raised while decoding (or building) bencoded values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Input ended before the value was complete
    #[error("truncated input")]
    TruncatedInput,

    /// Unexpected byte where a type tag, digit or delimiter was expected
    #[error("malformed value at offset {offset}: {reason}")]
    MalformedValue { offset: usize, reason: String },

    /// A declared length exceeds the configured bound
    #[error("length {declared} exceeds limit {limit}")]
    LengthOverflow { declared: u64, limit: usize },

    /// Nesting of lists/dictionaries is deeper than allowed
    #[error("nesting depth exceeds limit {limit}")]
    DepthExceeded { limit: usize },

    /// Dictionary keys repeat, or are unsorted under strict decoding
    #[error("non-canonical dictionary at offset {offset}")]
    NonCanonicalDictionary { offset: usize },

    /// A dictionary was built from pairs containing the same key twice
    #[error("duplicate dictionary key: {0}")]
    DuplicateKey(String),
}

impl ParseError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedValue {
            offset,
            reason: reason.into(),
        }
    }
}

/// All error types that can occur talking to the daemon
#[derive(Debug, Error)]
pub enum ClutchError {
    /// Bencode or frame parse failure
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The transport reached EOF or broke during a read/write
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection faulted while this call was pending, or is unusable
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No connection could be established
    #[error("Daemon unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    /// No response arrived in time
    #[error("Request {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Envelope shape or reply did not match the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with an explicit failure
    #[error("Daemon rejected request: {0}")]
    DaemonRejected(String),

    /// Arguments failed validation before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClutchError {
    /// A call that failed this way can be retried as-is on a live connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClutchError::Timeout { .. })
    }

    /// Transport-level failure; the connection must be re-established.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClutchError::ConnectionClosed
                | ClutchError::ConnectionLost(_)
                | ClutchError::Unreachable { .. }
                | ClutchError::Io(_)
        )
    }
}

/// Result type alias for Clutch operations
pub type Result<T> = std::result::Result<T, ClutchError>;
