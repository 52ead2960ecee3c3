//! Connector lifecycle

use crate::{Error, Result};
use std::fmt;

/// Provider lifecycle as seen by the connector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderState {
    /// Provider not yet started
    #[default]
    Uninitialized,

    /// Accepting acquisitions
    Active,

    /// Provider closed; terminal
    ShutDown,
}

impl ProviderState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ProviderState) -> bool {
        use ProviderState::*;

        matches!(
            (self, next),
            (Uninitialized, Active) | (Uninitialized, ShutDown) | (Active, ShutDown)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ProviderState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::Usage(format!(
                "connector cannot move from {} to {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }

    /// Fail with `Usage` once shut down
    pub fn ensure_usable(&self) -> Result<()> {
        match self {
            ProviderState::ShutDown => Err(Error::Usage("connector has been shut down".into())),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Active => write!(f, "active"),
            Self::ShutDown => write!(f, "shut_down"),
        }
    }
}
