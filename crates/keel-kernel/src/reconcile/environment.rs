use keel_types::{ManagedResource, ResourceSpec, Variant};

use super::{KindPlan, spec_mismatch};
use crate::error::ReconcileError;

pub(super) fn plan(resource: &ManagedResource) -> Result<KindPlan, ReconcileError> {
    let ResourceSpec::Environment(spec) = &resource.spec else {
        return Err(spec_mismatch(resource));
    };
    if spec.display_name.trim().is_empty() {
        return Err(ReconcileError::invalid(&resource.meta.key(), "environment name must not be blank"));
    }
    Ok(KindPlan::new(Variant::Structural))
}
