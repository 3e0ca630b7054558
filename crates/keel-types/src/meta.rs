use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Kind, ObjectKey, labels};

/// Declared owner of a managed resource. Always in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: Kind,
    pub name: String,
}

/// Ownership back-reference written onto children the control plane creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: Kind,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub kind: Kind,
    pub name: String,
    pub namespace: String,
    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_refs: Vec<OwnerRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub deletion_requested: bool,
    #[serde(default)]
    pub created_at_ns: u64,
}

impl ObjectMeta {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            uid: None,
            labels: BTreeMap::new(),
            parent: None,
            owner_refs: Vec::new(),
            finalizers: Vec::new(),
            resource_version: 0,
            generation: 0,
            deletion_requested: false,
            created_at_ns: 0,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.namespace.clone(), self.name.clone())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.label(labels::IDENTIFIER).filter(|v| !v.is_empty())
    }

    pub fn slug(&self) -> Option<&str> {
        self.label(labels::SLUG).filter(|v| !v.is_empty())
    }

    pub fn parent_key(&self) -> Option<ObjectKey> {
        self.parent
            .as_ref()
            .map(|p| ObjectKey::new(p.kind, self.namespace.clone(), p.name.clone()))
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns true when the finalizer was not already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns true when the finalizer was present and has been removed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    pub fn owner_of_kind(&self, kind: Kind) -> Option<&OwnerRef> {
        self.owner_refs.iter().find(|o| o.kind == kind)
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn with_parent(mut self, kind: Kind, name: impl Into<String>) -> Self {
        self.parent = Some(ParentRef {
            kind,
            name: name.into(),
        });
        self
    }
}
