//! Declarative object store: versioned writes, label selection and change notification.

mod mem_store;

pub use mem_store::MemStore;

use std::collections::BTreeMap;

use keel_types::{Kind, Object, ObjectKey, OwnerRef};
use tokio::sync::broadcast;

pub type StoreResult<T> = Result<T, StoreError>;

/// Contract the control plane relies on.
///
/// Every write is version checked against `meta.resource_version` and is
/// visible to the next read once it returns. `update` replaces metadata and
/// spec, `update_status` replaces only status. An object is erased once it is
/// marked for deletion and carries no finalizers.
pub trait Store: Send + Sync {
    fn get<T: Object>(&self, key: &ObjectKey) -> StoreResult<Option<T>>;
    fn list<T: Object>(&self, params: &ListParams) -> StoreResult<Vec<T>>;
    fn create<T: Object>(&self, object: &T) -> StoreResult<T>;
    fn update<T: Object>(&self, object: &T) -> StoreResult<T>;
    fn update_status<T: Object>(&self, object: &T) -> StoreResult<T>;
    /// Marks the object for deletion, or erases it when no finalizer holds it.
    fn delete(&self, key: &ObjectKey) -> StoreResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    Conflict { key: ObjectKey, expected: u64, actual: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("malformed object {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    /// Worth retrying after a reload.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Unavailable(_))
    }
}

/// Equality selection over one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub kind: Kind,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ListParams {
    pub fn kind(kind: Kind) -> Self {
        Self {
            kind,
            namespace: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, key: &ObjectKey, labels: &BTreeMap<String, String>) -> bool {
        key.kind == self.kind
            && self.namespace.as_ref().is_none_or(|ns| ns == &key.namespace)
            && self.labels.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
}

/// Change notification. Carries enough metadata to route the event without a read.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: ObjectKey,
    pub labels: BTreeMap<String, String>,
    pub owner_refs: Vec<OwnerRef>,
    pub parent: Option<ObjectKey>,
    pub resource_version: u64,
}
