//! Error types for the synchronization core.
//!
//! The taxonomy mirrors the failure domains of the three external
//! boundaries plus configuration and programmer misuse:
//! - [`Error::Provider`]: identity-provider stream failures; always
//!   recoverable, treated as sign-out by the tracker.
//! - [`Error::Store`]: backing-store query/upsert failures; the previous
//!   snapshot is retained (stale-but-available).
//! - [`Error::Transport`]: push-channel failures; recovery is delegated to
//!   the transport's reconnect policy.
//! - [`Error::Config`]: invalid endpoint or key at construction time.
//! - [`Error::Misuse`]: a wiring bug (e.g. driving a handle whose
//!   orchestrator has stopped); surfaced loudly and immediately.
//!
//! No error in this crate is fatal to the process: the worst degraded mode
//! is a stale snapshot with a disconnected channel and a known identity.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Identity-provider stream error. Never fatal; the tracker maps this
    /// to "signed out".
    #[error("identity provider error: {0}")]
    Provider(String),

    /// Backing-store query or upsert failure.
    #[error("store error: {0}")]
    Store(String),

    /// Push-channel transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid configuration (endpoint URL, key).
    #[error("configuration error: {0}")]
    Config(String),

    /// Programmer misuse of the API. Indicates a wiring bug, not a runtime
    /// condition.
    #[error("misuse: {0}")]
    Misuse(&'static str),

    /// JSON (de)serialization failure on a boundary payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by push-channel transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed and cannot carry further traffic.
    #[error("connection closed")]
    ConnectionClosed,

    /// The initial connection attempt failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The handshake did not complete within the configured timeout.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// An inbound frame could not be understood.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error is recoverable without user action (the channel
    /// transport or a later fetch will heal it).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Misuse(_) | Error::Config(_))
    }

    /// Convenience constructor for store errors.
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Convenience constructor for provider errors.
    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    /// Convenience constructor for configuration errors.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_convert_to_error() {
        let err: Error = TransportError::ConnectionClosed.into();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn misuse_and_config_are_not_recoverable() {
        assert!(!Error::Misuse("handle used after shutdown").is_recoverable());
        assert!(!Error::config("bad url").is_recoverable());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::store("select failed: timeout");
        assert_eq!(err.to_string(), "store error: select failed: timeout");
    }
}
