use keel_store::Store;
use keel_types::{ApplicationVariant, ManagedResource, ObjectKey, Variant, validate};

use super::{Engine, KindPlan, spec_mismatch};
use crate::{children, error::ReconcileError};

pub(super) fn plan<S: Store>(engine: &Engine<S>, resource: &ManagedResource) -> Result<KindPlan, ReconcileError> {
    let key = resource.meta.key();
    let Some(spec) = resource.as_application() else {
        return Err(spec_mismatch(resource));
    };
    validate_variant(&key, &spec.variant)?;
    if let Some(port) = spec.port
        && !validate::is_valid_port(u32::from(port))
    {
        return Err(ReconcileError::invalid(&key, format!("invalid port {port}")));
    }

    let mut plan = KindPlan::new(Variant::Structural);
    if matches!(spec.variant, ApplicationVariant::GitRepository { .. }) {
        plan.children
            .extend(children::default_domain(resource, engine.renderer(), engine.config()));
    }
    Ok(plan)
}

fn validate_variant(key: &ObjectKey, variant: &ApplicationVariant) -> Result<(), ReconcileError> {
    match variant {
        ApplicationVariant::GitRepository { repository, branch, .. } => {
            if !validate::is_valid_repository(repository) {
                return Err(ReconcileError::invalid(
                    key,
                    format!("repository '{repository}' must have the form owner/name"),
                ));
            }
            if branch.trim().is_empty() {
                return Err(ReconcileError::invalid(key, "branch must not be empty"));
            }
        }
        ApplicationVariant::ImageFromRegistry { image, tag } => {
            if image.trim().is_empty() {
                return Err(ReconcileError::invalid(key, "image must not be empty"));
            }
            if tag.trim().is_empty() {
                return Err(ReconcileError::invalid(key, "image tag must not be empty"));
            }
        }
        ApplicationVariant::DatabaseCluster { version, replicas, .. } => {
            if version.trim().is_empty() {
                return Err(ReconcileError::invalid(key, "database version must not be empty"));
            }
            if *replicas < 1 {
                return Err(ReconcileError::invalid(key, "database replicas must be at least 1"));
            }
        }
        ApplicationVariant::CacheCluster { replicas, .. } => {
            if *replicas < 1 {
                return Err(ReconcileError::invalid(key, "cache replicas must be at least 1"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{DatabaseEngine, Kind};

    #[test]
    fn variant_configuration_is_checked() {
        let key = ObjectKey::new(Kind::Application, "team", "web");
        let bad_repo = ApplicationVariant::GitRepository {
            repository: "no-slash".into(),
            branch: "main".into(),
            provider: Default::default(),
        };
        assert!(validate_variant(&key, &bad_repo).is_err());

        let no_replicas = ApplicationVariant::DatabaseCluster {
            engine: DatabaseEngine::Postgres,
            version: "16".into(),
            replicas: 0,
        };
        assert!(validate_variant(&key, &no_replicas).is_err());

        let image = ApplicationVariant::ImageFromRegistry {
            image: "nginx".into(),
            tag: "1.27".into(),
        };
        assert!(validate_variant(&key, &image).is_ok());
    }
}
