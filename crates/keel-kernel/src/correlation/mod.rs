//! One-way status mirroring from external objects onto the managed resources
//! that depend on them.
//!
//! Each projector watches one external kind, normalizes its status into a
//! single condition and upserts that condition on the owner. A per-source
//! fingerprint stored next to the condition in `processed_markers` makes
//! the write happen once per observed state; the owner's own status write
//! then re-triggers nothing.

mod fingerprint;
mod index;
pub mod projectors;

pub use fingerprint::fingerprint;
pub use index::CorrelationIndex;

use keel_store::{Store, StoreResult};
use keel_types::{Condition, ConditionStatus, ExternalObject, Kind, ManagedResource, ObjectKey};

use crate::{children, error::ReconcileError};
use projectors::{
    CACHE_PROJECTOR, CERTIFICATE_PROJECTOR, DATABASE_PROJECTOR, PipelineRunProjector, WorkloadProjector,
};

/// Normalized `(status, reason, message)` extracted from an external object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl Observation {
    pub fn new(status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

pub trait Projector: Send + Sync {
    fn source_kind(&self) -> Kind;
    fn owner_kind(&self) -> Kind;
    /// Label on the source that carries the owner's identifier.
    fn owner_label(&self) -> &'static str;
    fn condition_type(&self) -> &'static str;
    fn observe(&self, source: &ExternalObject) -> Observation;
}

static PROJECTORS: [&dyn Projector; 5] = [
    &PipelineRunProjector,
    &WorkloadProjector,
    &DATABASE_PROJECTOR,
    &CACHE_PROJECTOR,
    &CERTIFICATE_PROJECTOR,
];

pub fn all_projectors() -> &'static [&'static dyn Projector] {
    &PROJECTORS
}

pub fn projector_for(kind: Kind) -> Option<&'static dyn Projector> {
    PROJECTORS.iter().copied().find(|p| p.source_kind() == kind)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// No owner could be found; the owner may not exist yet or is gone.
    Uncorrelated,
    OwnerDeleting,
    /// The owner already holds a condition from a newer generation.
    Stale,
    /// Fingerprint matched the processed marker; nothing written.
    Unchanged,
    Written { owner: ObjectKey },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorResult {
    Stale,
    Unchanged,
    Changed,
}

/// Owner generation an observation is attributed to: the generation a
/// generation-scoped source was created for, otherwise the owner's current one.
fn attributed_generation(source: &ExternalObject, owner: &ManagedResource) -> u64 {
    children::rendered_generation(&source.meta).unwrap_or(owner.meta.generation)
}

/// Folds one observation into `owner.status` in memory.
///
/// Condition and marker change together or not at all.
pub fn apply_projection(
    projector: &dyn Projector,
    source: &ExternalObject,
    owner: &mut ManagedResource,
    now_ns: u64,
) -> MirrorResult {
    let condition_type = projector.condition_type();
    let generation = attributed_generation(source, owner);
    if owner
        .status
        .conditions
        .get(condition_type)
        .is_some_and(|c| c.observed_generation > generation)
    {
        return MirrorResult::Stale;
    }

    let observation = projector.observe(source);
    let digest = fingerprint(source.meta.generation, generation, &observation);
    let marker = source.source_key();
    if owner.status.processed_markers.get(&marker) == Some(&digest) {
        return MirrorResult::Unchanged;
    }

    let condition = Condition::new(
        condition_type,
        observation.status,
        &observation.reason,
        observation.message,
    )
    .observed_at(generation);
    owner.status.conditions.upsert(condition, now_ns);
    owner.status.processed_markers.insert(marker, digest);
    MirrorResult::Changed
}

/// Finds the owner of `source`: ownership back-reference first, then the
/// identifier label through a freshly built index.
pub fn correlate<S: Store>(
    store: &S,
    projector: &dyn Projector,
    source: &ExternalObject,
) -> StoreResult<Option<ManagedResource>> {
    let namespace = source.meta.namespace.as_str();
    if let Some(owner_ref) = source.meta.owner_of_kind(projector.owner_kind()) {
        let key = ObjectKey::new(owner_ref.kind, namespace, owner_ref.name.clone());
        if let Some(owner) = store.get::<ManagedResource>(&key)?
            && owner.meta.uid.as_deref() == Some(owner_ref.uid.as_str())
        {
            return Ok(Some(owner));
        }
    }

    let Some(identifier) = source.meta.label(projector.owner_label()) else {
        return Ok(None);
    };
    let index = CorrelationIndex::build(store, &[projector], namespace)?;
    match index.resolve(projector.source_kind(), identifier) {
        Some(key) => store.get(key),
        None => Ok(None),
    }
}

/// Mirrors the external object at `key` onto its owner and persists the
/// result with a version-checked status write.
pub fn project<S: Store>(store: &S, key: &ObjectKey, now_ns: u64) -> Result<ProjectionOutcome, ReconcileError> {
    let Some(projector) = projector_for(key.kind) else {
        return Ok(ProjectionOutcome::Uncorrelated);
    };
    let Some(source) = store.get::<ExternalObject>(key)? else {
        return Ok(ProjectionOutcome::Uncorrelated);
    };
    let Some(mut owner) = correlate(store, projector, &source)? else {
        log::debug!("no owner for {key}; skipping");
        return Ok(ProjectionOutcome::Uncorrelated);
    };
    if owner.meta.deletion_requested {
        return Ok(ProjectionOutcome::OwnerDeleting);
    }

    match apply_projection(projector, &source, &mut owner, now_ns) {
        MirrorResult::Stale => Ok(ProjectionOutcome::Stale),
        MirrorResult::Unchanged => Ok(ProjectionOutcome::Unchanged),
        MirrorResult::Changed => {
            owner.status.last_reconcile_ns = now_ns;
            let written = store.update_status(&owner)?;
            log::debug!("mirrored {key} onto {}", written.meta.key());
            Ok(ProjectionOutcome::Written {
                owner: written.meta.key(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_store::MemStore;
    use keel_types::{DeploymentSpec, Object, ObjectMeta, OwnerRef, ResourceSpec, labels, types};

    const DEP_ID: &str = "00000000-0000-4000-8000-0000000000d1";

    fn deployment(store: &MemStore) -> ManagedResource {
        let meta = ObjectMeta::new(Kind::Deployment, "default", "web-1").with_label(labels::IDENTIFIER, DEP_ID);
        store
            .create(&ManagedResource::new(meta, ResourceSpec::Deployment(DeploymentSpec::default())))
            .unwrap()
    }

    fn run(store: &MemStore, status: Option<ConditionStatus>) -> ExternalObject {
        let meta = ObjectMeta::new(Kind::PipelineRun, "default", "build-1").with_label(labels::DEPLOYMENT, DEP_ID);
        let mut obj = store.create(&ExternalObject::new(meta, serde_json::json!({}))).unwrap();
        if let Some(s) = status {
            obj.status
                .conditions
                .push(Condition::new(types::EXTERNAL_SUCCEEDED, s, "Done", ""));
            obj = store.update_status(&obj).unwrap();
        }
        obj
    }

    #[test]
    fn repeated_projection_writes_once() {
        let store = MemStore::new();
        let dep = deployment(&store);
        let source = run(&store, Some(ConditionStatus::True));

        let first = project(&store, &source.key(), 10).unwrap();
        assert_eq!(first, ProjectionOutcome::Written { owner: dep.key() });
        let after_first: ManagedResource = store.get(&dep.key()).unwrap().unwrap();

        let second = project(&store, &source.key(), 20).unwrap();
        assert_eq!(second, ProjectionOutcome::Unchanged);
        let after_second: ManagedResource = store.get(&dep.key()).unwrap().unwrap();
        assert_eq!(after_first, after_second);
        assert!(after_second.status.conditions.is_true(types::BUILD_SUCCEEDED));
        assert_eq!(after_second.status.processed_markers.len(), 1);
    }

    #[test]
    fn missing_owner_is_a_no_op() {
        let store = MemStore::new();
        let source = run(&store, None);
        assert_eq!(project(&store, &source.key(), 1).unwrap(), ProjectionOutcome::Uncorrelated);
    }

    #[test]
    fn owner_reference_beats_labels() {
        let store = MemStore::new();
        let dep = deployment(&store);
        let mut meta = ObjectMeta::new(Kind::Workload, "default", "workload-x");
        meta.owner_refs.push(OwnerRef {
            kind: Kind::Deployment,
            name: dep.meta.name.clone(),
            uid: dep.meta.uid.clone().unwrap(),
        });
        let workload = store.create(&ExternalObject::new(meta, serde_json::json!({}))).unwrap();
        let owner = correlate(&store, &WorkloadProjector, &workload).unwrap().unwrap();
        assert_eq!(owner.key(), dep.key());
    }

    #[test]
    fn stale_owner_reference_falls_back_to_label() {
        let store = MemStore::new();
        let dep = deployment(&store);
        let mut meta = ObjectMeta::new(Kind::Workload, "default", "workload-x").with_label(labels::DEPLOYMENT, DEP_ID);
        meta.owner_refs.push(OwnerRef {
            kind: Kind::Deployment,
            name: dep.meta.name.clone(),
            uid: "recreated-elsewhere".into(),
        });
        let workload = store.create(&ExternalObject::new(meta, serde_json::json!({}))).unwrap();
        let owner = correlate(&store, &WorkloadProjector, &workload).unwrap().unwrap();
        assert_eq!(owner.key(), dep.key());
    }

    #[test]
    fn racing_observations_converge() {
        let store = MemStore::new();
        let dep = deployment(&store);
        let done = run(&store, Some(ConditionStatus::True));
        let mut pending = done.clone();
        pending.status.conditions.clear();

        let mut in_order = dep.clone();
        apply_projection(&PipelineRunProjector, &pending, &mut in_order, 1);
        apply_projection(&PipelineRunProjector, &done, &mut in_order, 2);

        let mut duplicated = dep.clone();
        apply_projection(&PipelineRunProjector, &done, &mut duplicated, 3);
        assert_eq!(
            apply_projection(&PipelineRunProjector, &done, &mut duplicated, 4),
            MirrorResult::Unchanged
        );

        assert_eq!(in_order.status.processed_markers, duplicated.status.processed_markers);
        assert_eq!(
            in_order.status.conditions.status_of(types::BUILD_SUCCEEDED),
            duplicated.status.conditions.status_of(types::BUILD_SUCCEEDED)
        );
    }

    #[test]
    fn older_generation_sources_are_stale() {
        let store = MemStore::new();
        let mut dep = deployment(&store);
        dep.meta.generation = 2;
        dep.status.conditions.upsert(
            Condition::new(types::BUILD_SUCCEEDED, ConditionStatus::Unknown, "Running", "").observed_at(2),
            1,
        );
        let mut old = run(&store, Some(ConditionStatus::True));
        old.meta.labels.insert(labels::OWNER_GENERATION.into(), "1".into());
        assert_eq!(apply_projection(&PipelineRunProjector, &old, &mut dep, 5), MirrorResult::Stale);
        assert_eq!(
            dep.status.conditions.status_of(types::BUILD_SUCCEEDED),
            Some(ConditionStatus::Unknown)
        );
    }
}
