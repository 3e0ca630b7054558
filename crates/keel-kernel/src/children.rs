//! Children the control plane creates on behalf of a managed resource.
//!
//! The reconcilers decide whether and when a child exists and what its name
//! and labels are. What goes inside the child body is delegated to a
//! [`ChildRenderer`].

use keel_types::{
    ApplicationVariant, DomainSpec, DomainType, ExternalObject, Kind, ManagedResource, Object, ObjectKey,
    ObjectMeta, OwnerRef, ResourceSpec, labels,
};
use serde_json::{Value, json};

use crate::config::OperatorConfig;

/// Builds the bodies of child objects. Templating only; no control flow.
pub trait ChildRenderer: Send + Sync {
    fn pipeline_run(&self, deployment: &ManagedResource, application: &ManagedResource) -> Value;
    fn workload(&self, deployment: &ManagedResource, application: &ManagedResource, config: &OperatorConfig) -> Value;
    fn service_route(
        &self,
        deployment: &ManagedResource,
        application: &ManagedResource,
        config: &OperatorConfig,
    ) -> Value;
    fn database_cluster(&self, deployment: &ManagedResource, application: &ManagedResource) -> Value;
    fn cache_cluster(&self, deployment: &ManagedResource, application: &ManagedResource) -> Value;
    fn certificate(&self, domain: &ManagedResource) -> Value;
    /// Host name for an application's default domain.
    fn default_host(&self, application: &ManagedResource, config: &OperatorConfig) -> String;
}

/// Minimal JSON bodies carrying the fields a subsystem needs to act.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRenderer;

fn port_of(application: &ManagedResource, config: &OperatorConfig) -> u16 {
    application
        .as_application()
        .and_then(|a| a.port)
        .unwrap_or(config.default_port)
}

fn variant_of(application: &ManagedResource) -> Option<&ApplicationVariant> {
    application.as_application().map(|a| &a.variant)
}

impl ChildRenderer for TemplateRenderer {
    fn pipeline_run(&self, deployment: &ManagedResource, application: &ManagedResource) -> Value {
        let (repository, branch) = match variant_of(application) {
            Some(ApplicationVariant::GitRepository { repository, branch, .. }) => (repository.as_str(), branch.as_str()),
            _ => ("", ""),
        };
        json!({
            "repository": repository,
            "branch": branch,
            "commit": deployment.as_deployment().and_then(|d| d.commit_sha.clone()),
            "generation": deployment.meta.generation,
        })
    }

    fn workload(&self, deployment: &ManagedResource, application: &ManagedResource, config: &OperatorConfig) -> Value {
        let image = match variant_of(application) {
            Some(ApplicationVariant::ImageFromRegistry { image, tag }) => format!("{image}:{tag}"),
            _ => format!(
                "registry.{}/{}:{}",
                config.base_domain,
                application.identifier().unwrap_or_default(),
                deployment
                    .as_deployment()
                    .and_then(|d| d.commit_sha.as_deref())
                    .unwrap_or("latest")
            ),
        };
        json!({
            "image": image,
            "port": port_of(application, config),
            "replicas": 1,
        })
    }

    fn service_route(
        &self,
        deployment: &ManagedResource,
        application: &ManagedResource,
        config: &OperatorConfig,
    ) -> Value {
        json!({
            "selector": { labels::DEPLOYMENT: deployment.identifier() },
            "port": port_of(application, config),
        })
    }

    fn database_cluster(&self, _deployment: &ManagedResource, application: &ManagedResource) -> Value {
        match variant_of(application) {
            Some(ApplicationVariant::DatabaseCluster {
                engine,
                version,
                replicas,
            }) => json!({ "engine": engine, "version": version, "replicas": replicas }),
            _ => Value::Null,
        }
    }

    fn cache_cluster(&self, _deployment: &ManagedResource, application: &ManagedResource) -> Value {
        match variant_of(application) {
            Some(ApplicationVariant::CacheCluster { version, replicas }) => {
                json!({ "version": version, "replicas": replicas })
            }
            _ => Value::Null,
        }
    }

    fn certificate(&self, domain: &ManagedResource) -> Value {
        json!({ "dnsNames": [domain.as_domain().map(|d| d.host.as_str())] })
    }

    /// `<slug>-<identifier suffix>.<base domain>`; the suffix keeps equal slugs in
    /// different environments apart.
    fn default_host(&self, application: &ManagedResource, config: &OperatorConfig) -> String {
        let slug = application.slug().unwrap_or(application.meta.name.as_str());
        let identifier = application.identifier().unwrap_or_default();
        let suffix = identifier.get(identifier.len().saturating_sub(8)..).unwrap_or_default();
        format!("{slug}-{suffix}.{}", config.base_domain)
    }
}

/// A child the parent requires, addressed by a name derived from the parent's identifier.
#[derive(Debug, Clone)]
pub enum ChildPlan {
    Managed(ManagedResource),
    External(ExternalObject),
}

impl ChildPlan {
    pub fn key(&self) -> ObjectKey {
        match self {
            ChildPlan::Managed(m) => m.key(),
            ChildPlan::External(e) => e.key(),
        }
    }
}

/// `<prefix>-<identifier>`.
pub fn child_name(prefix: &str, parent_identifier: &str) -> String {
    format!("{prefix}-{parent_identifier}")
}

/// Metadata for a child of `parent`: same namespace, owner back-reference, and
/// every ancestry label the parent carries plus the parent's own identifier.
pub fn child_meta(kind: Kind, parent: &ManagedResource, name: impl Into<String>) -> ObjectMeta {
    let mut meta = ObjectMeta::new(kind, parent.meta.namespace.clone(), name);
    for (label, value) in ancestry_of(parent) {
        meta.labels.insert(label.to_string(), value);
    }
    meta.labels
        .insert(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string());
    if let Some(uid) = &parent.meta.uid {
        meta.owner_refs.push(OwnerRef {
            kind: parent.kind(),
            name: parent.meta.name.clone(),
            uid: uid.clone(),
        });
    }
    meta
}

/// Ancestry labels a descendant of `parent` must carry.
pub fn ancestry_of(parent: &ManagedResource) -> Vec<(&'static str, String)> {
    let mut out: Vec<(&'static str, String)> = labels::ANCESTRY
        .iter()
        .filter_map(|label| parent.meta.label(label).map(|v| (*label, v.to_string())))
        .collect();
    if let (Some(label), Some(identifier)) = (parent.kind().ancestry_label(), parent.identifier()) {
        out.retain(|(l, _)| *l != label);
        out.push((label, identifier.to_string()));
    }
    out
}

pub fn external_child(kind: Kind, parent: &ManagedResource, name: String, body: Value) -> ChildPlan {
    ChildPlan::External(ExternalObject::new(child_meta(kind, parent, name), body))
}

/// External child stamped with the parent generation it was rendered for.
/// An existing child stamped with an older generation is rolled forward.
pub fn rendered_child(kind: Kind, parent: &ManagedResource, name: String, body: Value) -> ChildPlan {
    let mut meta = child_meta(kind, parent, name);
    meta.labels
        .insert(labels::OWNER_GENERATION.to_string(), parent.meta.generation.to_string());
    ChildPlan::External(ExternalObject::new(meta, body))
}

pub fn rendered_generation(meta: &ObjectMeta) -> Option<u64> {
    meta.label(labels::OWNER_GENERATION).and_then(|v| v.parse().ok())
}

/// Identifier for a core-created managed child, derived from the parent's
/// identifier so that re-creating it yields the same value.
pub fn derived_identifier(parent_identifier: &str, role: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, format!("{parent_identifier}/{role}").as_bytes()).to_string()
}

pub const DEFAULT_DOMAIN_ROLE: &str = "default-domain";

/// The default domain of a web application.
pub fn default_domain(
    application: &ManagedResource,
    renderer: &dyn ChildRenderer,
    config: &OperatorConfig,
) -> Option<ChildPlan> {
    let app_identifier = application.identifier()?;
    let mut meta = child_meta(Kind::Domain, application, format!("{app_identifier}-default"));
    meta.labels.insert(
        labels::IDENTIFIER.to_string(),
        derived_identifier(app_identifier, DEFAULT_DOMAIN_ROLE),
    );
    meta.labels.insert(labels::SLUG.to_string(), "default".to_string());
    meta.parent = Some(keel_types::ParentRef {
        kind: Kind::Application,
        name: application.meta.name.clone(),
    });
    let spec = DomainSpec {
        host: renderer.default_host(application, config),
        deployment: None,
        domain_type: DomainType::Default,
        is_default: true,
        tls: true,
        port: application.as_application().and_then(|a| a.port),
    };
    Some(ChildPlan::Managed(ManagedResource::new(meta, ResourceSpec::Domain(spec))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{ApplicationSpec, validate};

    fn app() -> ManagedResource {
        let mut meta = ObjectMeta::new(Kind::Application, "team", "web")
            .with_label(labels::IDENTIFIER, "00000000-0000-4000-8000-0000000000a1")
            .with_label(labels::SLUG, "web")
            .with_label(labels::PROJECT, "00000000-0000-4000-8000-0000000000f1")
            .with_label(labels::ENVIRONMENT, "00000000-0000-4000-8000-0000000000e1");
        meta.uid = Some("uid-web".into());
        ManagedResource::new(
            meta,
            ResourceSpec::Application(ApplicationSpec {
                variant: ApplicationVariant::GitRepository {
                    repository: "acme/web".into(),
                    branch: "main".into(),
                    provider: Default::default(),
                },
                port: None,
                current_deployment: None,
            }),
        )
    }

    #[test]
    fn child_meta_inherits_ancestry() {
        let meta = child_meta(Kind::Deployment, &app(), "d");
        assert_eq!(meta.namespace, "team");
        assert_eq!(meta.label(labels::PROJECT), Some("00000000-0000-4000-8000-0000000000f1"));
        assert_eq!(meta.label(labels::APPLICATION), Some("00000000-0000-4000-8000-0000000000a1"));
        assert_eq!(meta.label(labels::MANAGED_BY), Some("keel"));
        assert_eq!(meta.owner_refs[0].uid, "uid-web");
        assert_eq!(meta.label(labels::IDENTIFIER), None);
    }

    #[test]
    fn default_domain_is_deterministic() {
        let config = OperatorConfig::new("apps.example.com").unwrap();
        let first = default_domain(&app(), &TemplateRenderer, &config).unwrap();
        let second = default_domain(&app(), &TemplateRenderer, &config).unwrap();
        let (ChildPlan::Managed(a), ChildPlan::Managed(b)) = (first, second) else {
            panic!("default domain must be managed");
        };
        assert_eq!(a.identifier(), b.identifier());
        assert!(validate::is_valid_identifier(a.identifier().unwrap()));
        assert_eq!(a.as_domain().unwrap().host, "web-000000a1.apps.example.com");
        assert_eq!(a.meta.name, "00000000-0000-4000-8000-0000000000a1-default");
    }
}
