use keel_types::{ManagedResource, ResourceSpec, Variant};

use super::{KindPlan, spec_mismatch};
use crate::error::ReconcileError;

/// Projects own nothing the engine creates; environments are declared by the caller.
pub(super) fn plan(resource: &ManagedResource) -> Result<KindPlan, ReconcileError> {
    let ResourceSpec::Project(spec) = &resource.spec else {
        return Err(spec_mismatch(resource));
    };
    if spec.display_name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        return Err(ReconcileError::invalid(&resource.meta.key(), "display name must not be blank"));
    }
    Ok(KindPlan::new(Variant::Structural))
}
