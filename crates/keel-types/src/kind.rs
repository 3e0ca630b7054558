use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::labels;

/// Every resource kind the control plane stores or observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Project,
    Environment,
    Application,
    Deployment,
    Domain,
    PipelineRun,
    Workload,
    ServiceRoute,
    DatabaseCluster,
    CacheCluster,
    Certificate,
}

impl Kind {
    pub const MANAGED: [Kind; 5] = [
        Kind::Project,
        Kind::Environment,
        Kind::Application,
        Kind::Deployment,
        Kind::Domain,
    ];

    pub const EXTERNAL: [Kind; 6] = [
        Kind::PipelineRun,
        Kind::Workload,
        Kind::ServiceRoute,
        Kind::DatabaseCluster,
        Kind::CacheCluster,
        Kind::Certificate,
    ];

    pub fn is_managed(self) -> bool {
        Self::MANAGED.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Project => "Project",
            Kind::Environment => "Environment",
            Kind::Application => "Application",
            Kind::Deployment => "Deployment",
            Kind::Domain => "Domain",
            Kind::PipelineRun => "PipelineRun",
            Kind::Workload => "Workload",
            Kind::ServiceRoute => "ServiceRoute",
            Kind::DatabaseCluster => "DatabaseCluster",
            Kind::CacheCluster => "CacheCluster",
            Kind::Certificate => "Certificate",
        }
    }

    /// Kind of the declared parent of a managed resource.
    pub fn parent_kind(self) -> Option<Kind> {
        match self {
            Kind::Environment => Some(Kind::Project),
            Kind::Application => Some(Kind::Environment),
            Kind::Deployment | Kind::Domain => Some(Kind::Application),
            _ => None,
        }
    }

    /// Label that descendants carry with this kind's identifier.
    pub fn ancestry_label(self) -> Option<&'static str> {
        match self {
            Kind::Project => Some(labels::PROJECT),
            Kind::Environment => Some(labels::ENVIRONMENT),
            Kind::Application => Some(labels::APPLICATION),
            Kind::Deployment => Some(labels::DEPLOYMENT),
            Kind::Domain => Some(labels::DOMAIN),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown resource kind '{0}'")]
pub struct ParseKindError(pub String);

impl FromStr for Kind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::MANAGED
            .iter()
            .chain(Self::EXTERNAL.iter())
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseKindError(s.to_string()))
    }
}

/// Store address of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}
