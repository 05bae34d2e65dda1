//! MinReview error types.
//!
//! # Error Classification
//!
//! Errors follow the pipeline's recovery boundaries:
//!
//! - **Transport** errors (resolve, connect, handshake, read, write) never
//!   leave a session actor. They drive the reconnect state machine and are
//!   only logged.
//! - **Protocol** errors (malformed envelope, missing fields) drop a single
//!   message; the connection stays open.
//! - **Fetch** errors (unexpected status, mid-stream I/O, file I/O) are fatal
//!   to one fetch or download job.
//! - **Transduction** errors (XML syntax, unbalanced tags, no captured
//!   subtree) are fatal to one document's JSON artifact but leave the fetched
//!   bytes on disk.

use thiserror::Error;

/// MinReview errors.
#[derive(Error, Debug)]
pub enum ReviewError {
    /// WebSocket or socket-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Envelope could not be decoded or is missing required fields.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Destination endpoint has no session.
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Server answered a fetch with a status the request did not allow.
    #[error("Unexpected HTTP status {status} (resume: {resume})")]
    UnexpectedStatus {
        /// Status code returned by the server.
        status: u16,
        /// Whether the request carried a `Range` header.
        resume: bool,
    },

    /// Fetch failed for a reason other than the status line.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// URL could not be parsed or joined.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// XML tokenizer rejected the input.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Structural failure while building the captured JSON tree.
    #[error("Transduction error: {0}")]
    Transduce(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for MinReview operations
pub type Result<T> = std::result::Result<T, ReviewError>;

impl From<reqwest::Error> for ReviewError {
    fn from(err: reqwest::Error) -> Self {
        ReviewError::Fetch(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ReviewError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ReviewError::Transport(err.to_string())
    }
}

impl From<axum::Error> for ReviewError {
    fn from(err: axum::Error) -> Self {
        ReviewError::Transport(err.to_string())
    }
}

impl From<quick_xml::Error> for ReviewError {
    fn from(err: quick_xml::Error) -> Self {
        ReviewError::Xml(err.to_string())
    }
}

impl From<toml::de::Error> for ReviewError {
    fn from(err: toml::de::Error) -> Self {
        ReviewError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message() {
        let err = ReviewError::UnexpectedStatus {
            status: 200,
            resume: true,
        };
        assert_eq!(err.to_string(), "Unexpected HTTP status 200 (resume: true)");
    }
}
