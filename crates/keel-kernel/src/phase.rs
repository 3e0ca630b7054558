//! Phase state machine.

use keel_types::{ConditionSet, ConditionStatus, Phase, Variant};

/// Derives the phase from the full condition set. Pure and total.
///
/// Callers pass only conditions observed for the resource's current
/// generation; anything older must read as absent.
pub fn next_phase(conditions: &ConditionSet, variant: Variant) -> Phase {
    if conditions.has_unrecoverable() {
        return Phase::Failed;
    }

    if let Some(build) = variant.build_condition() {
        match conditions.status_of(build) {
            None => return Phase::Initializing,
            Some(ConditionStatus::Unknown) => return Phase::Building,
            Some(ConditionStatus::False) => return Phase::Failed,
            Some(ConditionStatus::True) => {}
        }
    }

    match conditions.status_of(variant.readiness_condition()) {
        None if variant.requires_build() => Phase::Deploying,
        None => Phase::Initializing,
        Some(ConditionStatus::True) => Phase::Succeeded,
        Some(ConditionStatus::False) => Phase::Failed,
        Some(ConditionStatus::Unknown) => Phase::Deploying,
    }
}
