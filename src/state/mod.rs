//! State module for tracking phase progress
//!
//! # Components
//!
//! - `PhaseState`: the lifecycle of one phase iteration (feeding, draining, complete)
//! - `PhaseTracker`: holds a phase's current state and rejects illegal transitions

mod phase_state;

pub use phase_state::{PhaseState, PhaseTracker};
