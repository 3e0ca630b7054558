use serde::{Deserialize, Serialize};

use crate::{Condition, Kind, ObjectMeta};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_reason: Option<String>,
}

/// Status block reported by an external subsystem on its own object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalStatus {
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub unavailable_replicas: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerState>,
}

impl ExternalStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }
}

/// An object owned by another subsystem: created by the control plane,
/// observed through its status, never interpreted beyond that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalObject {
    pub meta: ObjectMeta,
    /// Rendered body handed to the subsystem; opaque to reconciliation.
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: ExternalStatus,
}

impl ExternalObject {
    pub fn new(meta: ObjectMeta, spec: serde_json::Value) -> Self {
        Self {
            meta,
            spec,
            status: ExternalStatus::default(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.meta.kind
    }

    /// Key used in processed markers: `Kind/name`.
    pub fn source_key(&self) -> String {
        format!("{}/{}", self.meta.kind, self.meta.name)
    }
}
