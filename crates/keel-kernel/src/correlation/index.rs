use std::collections::BTreeMap;

use keel_store::{ListParams, Store, StoreResult};
use keel_types::{Kind, ManagedResource, ObjectKey};

use super::Projector;

/// `(signal kind, owner identifier) -> owner key`, built fresh from a list
/// query every time it is needed.
#[derive(Debug, Default)]
pub struct CorrelationIndex {
    entries: BTreeMap<(Kind, String), Vec<ObjectKey>>,
}

impl CorrelationIndex {
    pub fn build<S: Store>(store: &S, projectors: &[&dyn Projector], namespace: &str) -> StoreResult<Self> {
        let mut index = Self::default();
        let mut owners_by_kind: BTreeMap<Kind, Vec<ManagedResource>> = BTreeMap::new();
        for projector in projectors {
            let owner_kind = projector.owner_kind();
            if !owners_by_kind.contains_key(&owner_kind) {
                let owners = store.list(&ListParams::kind(owner_kind).in_namespace(namespace))?;
                owners_by_kind.insert(owner_kind, owners);
            }
            for owner in &owners_by_kind[&owner_kind] {
                if let Some(identifier) = owner.identifier() {
                    index.insert(projector.source_kind(), identifier, owner.meta.key());
                }
            }
        }
        Ok(index)
    }

    pub fn insert(&mut self, signal: Kind, identifier: &str, owner: ObjectKey) {
        let owners = self.entries.entry((signal, identifier.to_string())).or_default();
        if !owners.contains(&owner) {
            owners.push(owner);
            owners.sort();
        }
    }

    /// Owner for a signal carrying `identifier`. Ambiguous matches resolve to
    /// the first key in order and are logged.
    pub fn resolve(&self, signal: Kind, identifier: &str) -> Option<&ObjectKey> {
        let owners = self.entries.get(&(signal, identifier.to_string()))?;
        if owners.len() > 1 {
            log::warn!(
                "{} owners share identifier {identifier} for {signal} signals; using {}",
                owners.len(),
                owners[0]
            );
        }
        owners.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
