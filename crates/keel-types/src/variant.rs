use serde::{Deserialize, Serialize};

use crate::types;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitProvider {
    #[default]
    Github,
    Gitlab,
    Bitbucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseEngine {
    Mysql,
    Postgres,
}

fn default_branch() -> String {
    "main".into()
}

fn default_tag() -> String {
    "latest".into()
}

fn default_replicas() -> u32 {
    1
}

/// What an application runs, as declared by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApplicationVariant {
    GitRepository {
        /// `owner/name` on the provider.
        repository: String,
        #[serde(default = "default_branch")]
        branch: String,
        #[serde(default)]
        provider: GitProvider,
    },
    ImageFromRegistry {
        image: String,
        #[serde(default = "default_tag")]
        tag: String,
    },
    DatabaseCluster {
        engine: DatabaseEngine,
        version: String,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
    CacheCluster {
        version: String,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
}

impl ApplicationVariant {
    pub fn phase_variant(&self) -> Variant {
        match self {
            ApplicationVariant::GitRepository { .. } => Variant::GitRepository,
            ApplicationVariant::ImageFromRegistry { .. } => Variant::ImageFromRegistry,
            ApplicationVariant::DatabaseCluster { .. } => Variant::DatabaseCluster,
            ApplicationVariant::CacheCluster { .. } => Variant::CacheCluster,
        }
    }

    pub fn serves_http(&self) -> bool {
        matches!(
            self,
            ApplicationVariant::GitRepository { .. } | ApplicationVariant::ImageFromRegistry { .. }
        )
    }
}

/// Phase-machine profile of a resource: which conditions gate which phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    GitRepository,
    ImageFromRegistry,
    DatabaseCluster,
    CacheCluster,
    /// Projects, environments and applications: ready once their children exist.
    Structural,
    Domain,
}

impl Variant {
    pub const ALL: [Variant; 6] = [
        Variant::GitRepository,
        Variant::ImageFromRegistry,
        Variant::DatabaseCluster,
        Variant::CacheCluster,
        Variant::Structural,
        Variant::Domain,
    ];

    pub fn requires_build(self) -> bool {
        matches!(self, Variant::GitRepository)
    }

    pub fn build_condition(self) -> Option<&'static str> {
        self.requires_build().then_some(types::BUILD_SUCCEEDED)
    }

    pub fn readiness_condition(self) -> &'static str {
        match self {
            Variant::GitRepository | Variant::ImageFromRegistry => types::WORKLOAD_READY,
            Variant::DatabaseCluster => types::DATABASE_READY,
            Variant::CacheCluster => types::CACHE_READY,
            Variant::Structural => types::CHILDREN_READY,
            Variant::Domain => types::CERTIFICATE_READY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_git_builds() {
        for variant in Variant::ALL {
            assert_eq!(variant.requires_build(), variant == Variant::GitRepository);
            assert_eq!(variant.build_condition().is_some(), variant.requires_build());
        }
    }

    #[test]
    fn variant_defaults_from_json() {
        let variant: ApplicationVariant = serde_json::from_value(serde_json::json!({
            "type": "git_repository",
            "repository": "acme/web"
        }))
        .unwrap();
        assert_eq!(
            variant,
            ApplicationVariant::GitRepository {
                repository: "acme/web".into(),
                branch: "main".into(),
                provider: GitProvider::Github,
            }
        );
        assert!(variant.serves_http());
    }
}
