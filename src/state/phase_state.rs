/// Phase state definitions
///
/// A phase iteration moves `Pending -> Feeding -> Draining -> Complete`. A
/// repeating phase goes back from `Complete` to `Feeding` with a fresh pool.
/// Cancellation moves a running phase to `Aborted`.
use crate::{Result, TideError};
use std::fmt;

/// Represents the current state of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseState {
    /// Phase has not started yet
    Pending,

    /// Initial work is being injected up to the watermark
    Feeding,

    /// Payloads are being parsed and the queue topped up
    Draining,

    /// Every fed item was parsed or dropped
    Complete,

    /// A required schema produced nothing; remaining work was discarded
    Aborted,
}

impl PhaseState {
    /// Returns true if no further transition is expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Returns true while the phase owns a worker pool
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Feeding | Self::Draining)
    }

    /// Returns true if moving from `self` to `next` is legal
    pub fn can_transition_to(&self, next: PhaseState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Feeding)
                | (Self::Feeding, Self::Draining)
                | (Self::Draining, Self::Complete)
                | (Self::Complete, Self::Feeding)
                | (Self::Feeding, Self::Aborted)
                | (Self::Draining, Self::Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Feeding => "feeding",
            Self::Draining => "draining",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current state of one phase, with checked transitions
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    index: usize,
    state: PhaseState,
}

impl PhaseTracker {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: PhaseState::Pending,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Moves to `next`
    ///
    /// # Errors
    ///
    /// Returns `TideError::InvalidTransition` if the move is not legal; the
    /// state is left unchanged.
    pub fn transition(&mut self, next: PhaseState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TideError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(phase = self.index, "Phase {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}
