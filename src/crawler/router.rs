//! Routing of emitted values to new work items
//!
//! Each emission is filtered by its rule's condition, turned into work items
//! and checked against the deduplicator. Active items go back on the current
//! phase's queue, inactive ones to the forward buffer.

use crate::dedup::Deduplicator;
use crate::extract::Emission;
use crate::url::resolve_target;
use crate::work::WorkItem;
use serde_json::Value;

/// Where a routed item goes
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Fetch in the current phase
    Fetch(WorkItem),
    /// Park for the next phase (or the next iteration of a repeating one)
    Forward(WorkItem),
}

/// Routes every value of one emission
///
/// # Arguments
///
/// * `emission` - Values of one field of one record
/// * `base` - URL of the payload the record came from
/// * `dedup` - Run-wide deduplicator
pub fn route_emission(emission: &Emission, base: &str, dedup: &Deduplicator) -> Vec<Route> {
    let rule = &emission.rule;

    if let Some(condition) = &rule.condition {
        if !condition.matches(&emission.parent) {
            tracing::debug!(
                "Condition on {}.{} not met for record from {}",
                emission.parent.schema,
                emission.field,
                emission.parent.source
            );
            return Vec::new();
        }
    }

    let mut routes = Vec::with_capacity(emission.values.len());
    for value in &emission.values {
        let target = match resolve_target(&rule.template, value, Some(base)) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("Skipping emitted value '{}' from {}: {}", value, base, e);
                continue;
            }
        };

        let mut item = rule.request.build(target);
        item.active = rule.active;
        item.duplicate = rule.duplicate;

        for key in &rule.copy {
            if let Some(v) = emission.parent.get(key) {
                item.metadata.insert(key.clone(), v.clone());
            }
        }
        if let Some(key) = &rule.link_parent {
            item.metadata
                .insert(key.clone(), Value::String(emission.parent.source.clone()));
        }

        if item.active {
            if dedup.should_fetch(&item.dedup_key(), item.duplicate) {
                routes.push(Route::Fetch(item));
            } else {
                tracing::trace!("Already seen: {}", item.target);
            }
        } else if dedup.admit_forward(&item) {
            routes.push(Route::Forward(item));
        } else {
            tracing::trace!("Already seen or forwarded: {}", item.target);
        }
    }

    routes
}
