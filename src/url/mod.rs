//! URL handling for work targets
//!
//! This module provides target normalization for deduplication, template
//! resolution for emitted targets, and host lookup for reachability
//! checks.

mod domain;
mod normalize;
mod template;

pub use domain::host_and_port;
pub use normalize::{dedup_key, normalize_target};
pub use template::{resolve_target, PLACEHOLDER};
