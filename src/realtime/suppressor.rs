use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CollabError;

/// Which side currently owns the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoState {
    Idle,
    /// A remote snapshot was applied; local handlers stay muted until `until`
    ApplyingRemote { until: Instant },
    BroadcastingLocal,
}

/// Keeps remote patches from being mistaken for local edits and re-sent.
#[derive(Debug)]
pub struct EchoSuppressor {
    state: EchoState,
    settle: Duration,
}

impl EchoSuppressor {
    pub fn new(settle: Duration) -> Self {
        Self {
            state: EchoState::Idle,
            settle,
        }
    }

    pub fn state(&self) -> EchoState {
        self.state
    }

    /// Local edit and cursor handlers only run while idle
    pub fn allows_local(&self) -> bool {
        self.state == EchoState::Idle
    }

    pub fn is_applying_remote(&self) -> bool {
        matches!(self.state, EchoState::ApplyingRemote { .. })
    }

    /// Start applying a remote snapshot. A second remote while still
    /// applying pushes the settle deadline out.
    pub fn begin_remote(&mut self, now: Instant) -> Result<(), CollabError> {
        match self.state {
            EchoState::BroadcastingLocal => {
                Err(CollabError::EchoGuard("remote apply while broadcasting local change"))
            }
            EchoState::Idle | EchoState::ApplyingRemote { .. } => {
                self.state = EchoState::ApplyingRemote {
                    until: now + self.settle,
                };
                Ok(())
            }
        }
    }

    /// Return to idle once the settle delay has passed. Returns true on transition.
    pub fn settle(&mut self, now: Instant) -> bool {
        match self.state {
            EchoState::ApplyingRemote { until } if now >= until => {
                debug!("Remote apply settled");
                self.state = EchoState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn begin_local(&mut self) -> Result<(), CollabError> {
        match self.state {
            EchoState::Idle => {
                self.state = EchoState::BroadcastingLocal;
                Ok(())
            }
            EchoState::ApplyingRemote { .. } => {
                Err(CollabError::EchoGuard("local broadcast while applying remote change"))
            }
            EchoState::BroadcastingLocal => {
                Err(CollabError::EchoGuard("local broadcast already in progress"))
            }
        }
    }

    pub fn end_local(&mut self) {
        if self.state == EchoState::BroadcastingLocal {
            self.state = EchoState::Idle;
        }
    }

    /// When the guard next wants to be polled
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            EchoState::ApplyingRemote { until } => Some(until),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = EchoState::Idle;
    }
}
