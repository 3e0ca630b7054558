//! Deletion-time cascade: children go first, the finalizer goes last.

use keel_store::{ListParams, Store, StoreError};
use keel_types::{ExternalObject, Kind, ManagedResource, Object, ObjectKey, ObjectMeta};

use crate::{
    config::OperatorConfig,
    error::ReconcileError,
    reconcile::{Action, Engine},
};

/// Where a resource stands in its deletion protocol after one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeState {
    DeletionRequested,
    /// Deletes were issued but a re-enumeration still found these children.
    ChildrenDeleting { remaining: Vec<ObjectKey> },
    /// The finalizer is gone and the store is free to erase the resource.
    FinalizerCleared,
}

impl CascadeState {
    pub fn action(&self, config: &OperatorConfig) -> Action {
        match self {
            CascadeState::DeletionRequested => Action::Requeue,
            CascadeState::ChildrenDeleting { .. } => Action::RequeueAfter(config.cascade_recheck),
            CascadeState::FinalizerCleared => Action::Done,
        }
    }
}

/// Finalizer the control plane puts on every managed resource of `kind`.
pub fn finalizer_for(kind: Kind) -> String {
    format!("keel.dev/{}-finalizer", kind.as_str().to_ascii_lowercase())
}

/// Kinds whose instances are removed before a resource of `kind` may go.
pub fn cascade_kinds(kind: Kind) -> &'static [Kind] {
    match kind {
        Kind::Project => &[Kind::Environment],
        Kind::Environment => &[Kind::Application],
        Kind::Application => &[Kind::Deployment, Kind::Domain],
        Kind::Deployment => &[
            Kind::PipelineRun,
            Kind::Workload,
            Kind::ServiceRoute,
            Kind::DatabaseCluster,
            Kind::CacheCluster,
        ],
        Kind::Domain => &[Kind::Certificate],
        _ => &[],
    }
}

/// A child is anything of a cascade kind in the parent's namespace that
/// points at the parent by ancestry label, owner reference or parent reference.
fn is_child_of(meta: &ObjectMeta, parent: &ManagedResource) -> bool {
    let by_label = match (parent.kind().ancestry_label(), parent.identifier()) {
        (Some(label), Some(identifier)) => meta.label(label) == Some(identifier),
        _ => false,
    };
    let by_owner = parent
        .meta
        .uid
        .as_deref()
        .is_some_and(|uid| meta.owner_refs.iter().any(|o| o.uid == uid));
    let by_parent = meta
        .parent
        .as_ref()
        .is_some_and(|p| p.kind == parent.kind() && p.name == parent.meta.name);
    by_label || by_owner || by_parent
}

fn list_children<S: Store, T: Object>(
    store: &S,
    kind: Kind,
    parent: &ManagedResource,
) -> Result<Vec<ObjectKey>, StoreError> {
    let params = ListParams::kind(kind).in_namespace(parent.meta.namespace.clone());
    Ok(store
        .list::<T>(&params)?
        .into_iter()
        .filter(|child| is_child_of(child.meta(), parent))
        .map(|child| child.key())
        .collect())
}

/// Fresh enumeration of every child of `parent`; never cached.
pub fn enumerate_children<S: Store>(store: &S, parent: &ManagedResource) -> Result<Vec<ObjectKey>, StoreError> {
    let mut children = Vec::new();
    for &kind in cascade_kinds(parent.kind()) {
        if kind.is_managed() {
            children.extend(list_children::<S, ManagedResource>(store, kind, parent)?);
        } else {
            children.extend(list_children::<S, ExternalObject>(store, kind, parent)?);
        }
    }
    Ok(children)
}

impl<S: Store> Engine<S> {
    /// One pass of the cascade for a resource whose deletion was requested.
    pub fn finalize(&self, resource: ManagedResource) -> Result<CascadeState, ReconcileError> {
        let key = resource.meta.key();
        let finalizer = finalizer_for(resource.kind());
        if !resource.meta.has_finalizer(&finalizer) {
            return Ok(CascadeState::FinalizerCleared);
        }

        let store = self.store();
        for child in enumerate_children(store.as_ref(), &resource)? {
            match store.delete(&child) {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(err) => {
                    log::warn!("deleting {child} for {key} failed: {err}");
                    return Err(err.into());
                }
            }
        }

        let remaining = enumerate_children(store.as_ref(), &resource)?;
        if !remaining.is_empty() {
            log::debug!("{key} waiting on {} children", remaining.len());
            return Ok(CascadeState::ChildrenDeleting { remaining });
        }

        let mut cleared = resource;
        cleared.meta.remove_finalizer(&finalizer);
        store.update(&cleared)?;
        log::debug!("{key} finalizer cleared");
        Ok(CascadeState::FinalizerCleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperatorConfig;
    use keel_store::MemStore;
    use keel_types::{EnvironmentSpec, ProjectSpec, ResourceSpec, labels};
    use std::sync::Arc;

    const PROJECT_ID: &str = "00000000-0000-4000-8000-0000000000f1";

    fn engine(store: Arc<MemStore>) -> Engine<MemStore> {
        Engine::new(store, OperatorConfig::new("apps.example.com").unwrap())
    }

    fn project(store: &MemStore) -> ManagedResource {
        let mut meta = ObjectMeta::new(Kind::Project, "team", "acme")
            .with_label(labels::IDENTIFIER, PROJECT_ID)
            .with_label(labels::SLUG, "acme");
        meta.add_finalizer(&finalizer_for(Kind::Project));
        store
            .create(&ManagedResource::new(meta, ResourceSpec::Project(ProjectSpec::default())))
            .unwrap()
    }

    fn environment(store: &MemStore, name: &str, finalizer: bool) -> ManagedResource {
        let mut meta = ObjectMeta::new(Kind::Environment, "team", name)
            .with_label(labels::PROJECT, PROJECT_ID)
            .with_parent(Kind::Project, "acme");
        if finalizer {
            meta.add_finalizer(&finalizer_for(Kind::Environment));
        }
        store
            .create(&ManagedResource::new(meta, ResourceSpec::Environment(EnvironmentSpec::default())))
            .unwrap()
    }

    #[test]
    fn finalizer_names_are_per_kind() {
        assert_eq!(finalizer_for(Kind::Deployment), "keel.dev/deployment-finalizer");
    }

    #[test]
    fn children_are_found_by_label_or_parent() {
        let store = MemStore::new();
        let parent = project(&store);
        environment(&store, "prod", false);
        let unlabeled = ObjectMeta::new(Kind::Environment, "team", "staging").with_parent(Kind::Project, "acme");
        store
            .create(&ManagedResource::new(unlabeled, ResourceSpec::Environment(EnvironmentSpec::default())))
            .unwrap();
        let stranger = ObjectMeta::new(Kind::Environment, "team", "other").with_parent(Kind::Project, "else");
        store
            .create(&ManagedResource::new(stranger, ResourceSpec::Environment(EnvironmentSpec::default())))
            .unwrap();

        let children = enumerate_children(&store, &parent).unwrap();
        let names: Vec<_> = children.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["prod", "staging"]);
    }

    #[test]
    fn finalizer_waits_for_children_with_finalizers() {
        let store = Arc::new(MemStore::new());
        let engine = engine(store.clone());
        let parent = project(&store);
        let env = environment(&store, "prod", true);
        store.delete(&parent.key()).unwrap();

        let deleting: ManagedResource = store.get(&parent.key()).unwrap().unwrap();
        let state = engine.finalize(deleting.clone()).unwrap();
        assert_eq!(
            state,
            CascadeState::ChildrenDeleting {
                remaining: vec![env.key()]
            }
        );
        assert!(store.contains(&parent.key()));
        let env_now: ManagedResource = store.get(&env.key()).unwrap().unwrap();
        assert!(env_now.meta.deletion_requested);

        // The child finishes its own cascade.
        engine.finalize(env_now).unwrap();
        assert!(!store.contains(&env.key()));

        let deleting: ManagedResource = store.get(&parent.key()).unwrap().unwrap();
        assert_eq!(engine.finalize(deleting).unwrap(), CascadeState::FinalizerCleared);
        assert!(!store.contains(&parent.key()));
    }

    #[test]
    fn failed_child_delete_keeps_the_finalizer() {
        let store = Arc::new(MemStore::new());
        let engine = engine(store.clone());
        let parent = project(&store);
        environment(&store, "prod", false);
        store.delete(&parent.key()).unwrap();
        let deleting: ManagedResource = store.get(&parent.key()).unwrap().unwrap();

        store.fail_next_writes(1);
        let err = engine.finalize(deleting).unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Transient);
        let still: ManagedResource = store.get(&parent.key()).unwrap().unwrap();
        assert!(still.meta.has_finalizer(&finalizer_for(Kind::Project)));
    }
}
