//! Wire connection state machine

use crate::{Error, Result};
use std::fmt;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, nothing sent yet
    Initial,

    /// SSLRequest sent, awaiting S/N
    NegotiatingTls,

    /// Startup sent, exchanging credentials
    Authenticating,

    /// Ready for a query
    Idle,

    /// Simple query sent, reading until ReadyForQuery
    QueryInProgress,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initial, NegotiatingTls)
                | (Initial, Authenticating)
                | (NegotiatingTls, Authenticating)
                | (Authenticating, Idle)
                | (Idle, QueryInProgress)
                | (QueryInProgress, Idle)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Idle => write!(f, "idle"),
            Self::QueryInProgress => write!(f, "query_in_progress"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_startup_path() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::Authenticating).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_ok());
        assert!(state.transition(ConnectionState::QueryInProgress).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_ok());
    }

    #[test]
    fn test_tls_startup_path() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::NegotiatingTls).is_ok());
        assert!(state.transition(ConnectionState::Authenticating).is_ok());
    }

    #[test]
    fn test_query_before_auth_rejected() {
        let mut state = ConnectionState::Authenticating;
        assert!(state.transition(ConnectionState::QueryInProgress).is_err());
        assert_eq!(state, ConnectionState::Authenticating);
    }

    #[test]
    fn test_close_from_any_state() {
        let mut state = ConnectionState::QueryInProgress;
        assert!(state.transition(ConnectionState::Closed).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_err());
    }
}
