//! Simulated external subsystems.
//!
//! Each helper rewrites the status block of an external object the way its
//! owning subsystem would, through a version-checked status write.

use keel_store::{Store, StoreError, StoreResult};
use keel_types::{Condition, ConditionStatus, ContainerState, ExternalObject, ObjectKey, types};

pub fn update<S: Store>(
    store: &S,
    key: &ObjectKey,
    change: impl FnOnce(&mut ExternalObject),
) -> StoreResult<ExternalObject> {
    let mut object: ExternalObject = store.get(key)?.ok_or_else(|| StoreError::NotFound(key.clone()))?;
    change(&mut object);
    object.status.observed_generation = object.meta.generation;
    store.update_status(&object)
}

pub fn set_condition<S: Store>(
    store: &S,
    key: &ObjectKey,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
) -> StoreResult<ExternalObject> {
    update(store, key, |object| {
        object.status.conditions.retain(|c| c.condition_type != condition_type);
        object
            .status
            .conditions
            .push(Condition::new(condition_type, status, reason, ""));
    })
}

pub fn pipeline_running<S: Store>(store: &S, key: &ObjectKey) -> StoreResult<ExternalObject> {
    set_condition(store, key, types::EXTERNAL_SUCCEEDED, ConditionStatus::Unknown, "Running")
}

pub fn pipeline_succeeded<S: Store>(store: &S, key: &ObjectKey) -> StoreResult<ExternalObject> {
    set_condition(store, key, types::EXTERNAL_SUCCEEDED, ConditionStatus::True, "Succeeded")
}

pub fn pipeline_failed<S: Store>(store: &S, key: &ObjectKey) -> StoreResult<ExternalObject> {
    set_condition(store, key, types::EXTERNAL_SUCCEEDED, ConditionStatus::False, "Failed")
}

pub fn workload_ready<S: Store>(store: &S, key: &ObjectKey, replicas: u32) -> StoreResult<ExternalObject> {
    update(store, key, |object| {
        object.status.replicas = replicas;
        object.status.ready_replicas = replicas;
        object.status.unavailable_replicas = 0;
    })
}

pub fn workload_unavailable<S: Store>(store: &S, key: &ObjectKey, replicas: u32) -> StoreResult<ExternalObject> {
    update(store, key, |object| {
        object.status.replicas = replicas;
        object.status.ready_replicas = 0;
        object.status.unavailable_replicas = replicas;
    })
}

pub fn workload_crash_looping<S: Store>(store: &S, key: &ObjectKey, restarts: u32) -> StoreResult<ExternalObject> {
    update(store, key, |object| {
        object.status.ready_replicas = 0;
        object.status.containers = vec![ContainerState {
            name: "app".into(),
            restart_count: restarts,
            waiting_reason: Some("CrashLoopBackOff".into()),
        }];
    })
}

/// `Ready` on a database cluster, cache cluster or certificate.
pub fn ready<S: Store>(store: &S, key: &ObjectKey) -> StoreResult<ExternalObject> {
    set_condition(store, key, types::EXTERNAL_READY, ConditionStatus::True, "Ready")
}

pub fn not_ready<S: Store>(store: &S, key: &ObjectKey, reason: &str) -> StoreResult<ExternalObject> {
    set_condition(store, key, types::EXTERNAL_READY, ConditionStatus::False, reason)
}
