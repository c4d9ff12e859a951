//! Error types for relay sessions and command execution.

use thiserror::Error;

/// Failure scoped to a single relay. Never fatal on its own: the fan-out
/// layer absorbs these and only the aggregate count decides the outcome.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The relay was unreachable or the handshake failed.
    #[error("connect {url}: {reason}")]
    Connection { url: String, reason: String },

    /// The relay accepted the connection but refused the event.
    #[error("{url} rejected event: {message}")]
    PublishRejected { url: String, message: String },

    /// The connection was closed before the exchange finished.
    #[error("connection closed")]
    Closed,

    /// Priming never produced a signed event to publish.
    #[error("event was not signed")]
    NotSigned,

    #[error("signing failed: {0}")]
    Signing(#[from] crate::keys::KeyError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Write operations whose aggregate failure is reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Post,
    Reply,
    Repost,
    Like,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Post => "post",
            Operation::Reply => "reply",
            Operation::Repost => "repost",
            Operation::Like => "like",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// User-visible command failures.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// Zero relays out of the matching set accepted the event.
    #[error("cannot {0}")]
    AggregateFailure(Operation),

    /// No configured relay matched the request, or none of them connected.
    #[error("cannot connect relays")]
    NoMatchingRelay,

    #[error("content is empty")]
    EmptyContent,

    /// The configured private key could not be decoded, so nothing can be signed.
    #[error("invalid private key: {0}")]
    InvalidKey(String),
}
