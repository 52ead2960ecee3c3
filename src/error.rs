//! Error types

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by connectors, providers, sessions and pools
#[derive(Debug, Error)]
pub enum Error {
    /// Identity rejected or not permitted on the instance
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network path to the instance is unavailable
    #[error("transport error: {0}")]
    Transport(String),

    /// No pooled session became available within the acquire timeout
    #[error("pool exhausted: no session available within {timeout:?}")]
    PoolExhausted {
        /// The acquire timeout that elapsed
        timeout: Duration,
    },

    /// Lifecycle operations called out of order
    #[error("usage error: {0}")]
    Usage(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wire protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected a query
    #[error("sql error: {0}")]
    Sql(String),

    /// I/O error on an established connection
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

impl Error {
    /// Static label for metrics and structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth",
            Error::Transport(_) => "transport",
            Error::PoolExhausted { .. } => "pool_exhausted",
            Error::Usage(_) => "usage",
            Error::Config(_) => "config",
            Error::Protocol(_) => "protocol",
            Error::Sql(_) => "sql",
            Error::Io(_) => "io",
            Error::ConnectionClosed => "connection_closed",
            Error::InvalidState { .. } => "invalid_state",
        }
    }

    /// Whether the failure happened while establishing the connection
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Transport(_))
    }

    /// Whether the connection can no longer be used after this error
    ///
    /// `Sql` leaves the session idle and usable; everything else that can
    /// come out of a query means the wire state is lost.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Protocol(_)
                | Error::Io(_)
                | Error::ConnectionClosed
                | Error::InvalidState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_message_names_timeout() {
        let err = Error::PoolExhausted {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(
            err.to_string(),
            "pool exhausted: no session available within 1s"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io_err.into();
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_connect_failure_classification() {
        assert!(Error::Auth("denied".into()).is_connect_failure());
        assert!(Error::Transport("unreachable".into()).is_connect_failure());
        assert!(!Error::Usage("early shutdown".into()).is_connect_failure());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::ConnectionClosed.is_disconnect());
        assert!(Error::Protocol("bad frame".into()).is_disconnect());
        assert!(Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset")).is_disconnect());
        assert!(!Error::Sql("syntax error".into()).is_disconnect());
        assert!(!Error::Auth("denied".into()).is_disconnect());
    }
}
