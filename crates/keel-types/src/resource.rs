use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ApplicationVariant, ConditionSet, Kind, ObjectMeta, Phase};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

fn default_environment_name() -> String {
    "production".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(default = "default_environment_name")]
    pub display_name: String,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            display_name: default_environment_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub variant: ApplicationVariant,
    /// Container port; falls back to the operator default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Name of the promoted deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_deployment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// Make this the application's current deployment once it succeeds.
    #[serde(default)]
    pub promote: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    #[default]
    Default,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub host: String,
    /// Deployment the route points at; the application's current one when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    #[serde(default)]
    pub domain_type: DomainType,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSpec {
    Project(ProjectSpec),
    Environment(EnvironmentSpec),
    Application(ApplicationSpec),
    Deployment(DeploymentSpec),
    Domain(DomainSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> Kind {
        match self {
            ResourceSpec::Project(_) => Kind::Project,
            ResourceSpec::Environment(_) => Kind::Environment,
            ResourceSpec::Application(_) => Kind::Application,
            ResourceSpec::Deployment(_) => Kind::Deployment,
            ResourceSpec::Domain(_) => Kind::Domain,
        }
    }
}

/// Reconciler-owned view of a managed resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub conditions: ConditionSet,
    /// External source key -> fingerprint of the last mirrored observation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processed_markers: BTreeMap<String, String>,
    #[serde(default)]
    pub observed_generation: u64,
    /// Identifier seen on first successful validation; later edits are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub last_reconcile_ns: u64,
}

impl ResourceStatus {
    /// Compares everything except the reconcile timestamp.
    pub fn same_state(&self, other: &ResourceStatus) -> bool {
        self.phase == other.phase
            && self.conditions == other.conditions
            && self.processed_markers == other.processed_markers
            && self.observed_generation == other.observed_generation
            && self.bound_identifier == other.bound_identifier
            && self.message == other.message
    }
}

/// A node of the project/environment/application/deployment/domain hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub meta: ObjectMeta,
    pub spec: ResourceSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl ManagedResource {
    pub fn new(mut meta: ObjectMeta, spec: ResourceSpec) -> Self {
        meta.kind = spec.kind();
        Self {
            meta,
            spec,
            status: ResourceStatus::default(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.meta.kind
    }

    pub fn identifier(&self) -> Option<&str> {
        self.meta.identifier()
    }

    pub fn slug(&self) -> Option<&str> {
        self.meta.slug()
    }

    pub fn as_application(&self) -> Option<&ApplicationSpec> {
        match &self.spec {
            ResourceSpec::Application(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_deployment(&self) -> Option<&DeploymentSpec> {
        match &self.spec {
            ResourceSpec::Deployment(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_domain(&self) -> Option<&DomainSpec> {
        match &self.spec {
            ResourceSpec::Domain(spec) => Some(spec),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;

    #[test]
    fn new_aligns_meta_kind_with_spec() {
        let res = ManagedResource::new(
            ObjectMeta::new(Kind::Project, "default", "env"),
            ResourceSpec::Environment(EnvironmentSpec::default()),
        );
        assert_eq!(res.kind(), Kind::Environment);
    }

    #[test]
    fn environment_name_defaults_to_production() {
        let spec: ResourceSpec = serde_json::from_value(serde_json::json!({ "environment": {} })).unwrap();
        assert_eq!(spec, ResourceSpec::Environment(EnvironmentSpec::default()));
        if let ResourceSpec::Environment(env) = spec {
            assert_eq!(env.display_name, "production");
        }
    }

    #[test]
    fn status_comparison_ignores_reconcile_time() {
        let a = ResourceStatus::default();
        let mut b = a.clone();
        b.last_reconcile_ns = 42;
        assert!(a.same_state(&b));
        b.message = "changed".into();
        assert!(!a.same_state(&b));
    }

    #[test]
    fn resource_round_trips_through_json() {
        let mut res = ManagedResource::new(
            ObjectMeta::new(Kind::Deployment, "default", "web-1")
                .with_label(labels::IDENTIFIER, "6f0f5cf3-4ae9-4c39-9d4d-0c4f3f9b8b11")
                .with_parent(Kind::Application, "web"),
            ResourceSpec::Deployment(DeploymentSpec {
                commit_sha: Some("abc123".into()),
                promote: true,
            }),
        );
        res.status.phase = Phase::Building;
        let value = serde_json::to_value(&res).unwrap();
        let back: ManagedResource = serde_json::from_value(value).unwrap();
        assert_eq!(back, res);
    }
}
