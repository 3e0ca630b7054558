use keel_kernel::OperatorConfig;
use keel_types::{
    ApplicationSpec, ApplicationVariant, DatabaseEngine, DeploymentSpec, DomainSpec, DomainType, EnvironmentSpec,
    Kind, ManagedResource, ObjectKey, ObjectMeta, ProjectSpec, ResourceSpec, labels,
};

pub const NS: &str = "team";
pub const BASE_DOMAIN: &str = "apps.example.com";

/// Canonical identifier number `n`.
pub fn id(n: u32) -> String {
    format!("00000000-0000-4000-8000-{n:012x}")
}

pub fn operator_config() -> OperatorConfig {
    OperatorConfig::new(BASE_DOMAIN).unwrap()
}

pub fn meta(kind: Kind, name: &str, slug: &str, n: u32, parent: Option<&str>) -> ObjectMeta {
    let meta = ObjectMeta::new(kind, NS, name)
        .with_label(labels::IDENTIFIER, id(n))
        .with_label(labels::SLUG, slug);
    match (parent, kind.parent_kind()) {
        (Some(parent), Some(parent_kind)) => meta.with_parent(parent_kind, parent),
        _ => meta,
    }
}

pub fn project(name: &str, n: u32) -> ManagedResource {
    ManagedResource::new(
        meta(Kind::Project, name, name, n, None),
        ResourceSpec::Project(ProjectSpec::default()),
    )
}

pub fn environment(name: &str, project: &str, n: u32) -> ManagedResource {
    ManagedResource::new(
        meta(Kind::Environment, name, name, n, Some(project)),
        ResourceSpec::Environment(EnvironmentSpec::default()),
    )
}

pub fn application(name: &str, environment: &str, variant: ApplicationVariant, n: u32) -> ManagedResource {
    ManagedResource::new(
        meta(Kind::Application, name, name, n, Some(environment)),
        ResourceSpec::Application(ApplicationSpec {
            variant,
            port: None,
            current_deployment: None,
        }),
    )
}

pub fn deployment(name: &str, application: &str, commit: Option<&str>, n: u32) -> ManagedResource {
    ManagedResource::new(
        meta(Kind::Deployment, name, name, n, Some(application)),
        ResourceSpec::Deployment(DeploymentSpec {
            commit_sha: commit.map(str::to_string),
            promote: false,
        }),
    )
}

pub fn custom_domain(name: &str, application: &str, host: &str, tls: bool, n: u32) -> ManagedResource {
    ManagedResource::new(
        meta(Kind::Domain, name, name, n, Some(application)),
        ResourceSpec::Domain(DomainSpec {
            host: host.into(),
            deployment: None,
            domain_type: DomainType::Custom,
            is_default: false,
            tls,
            port: None,
        }),
    )
}

pub fn git() -> ApplicationVariant {
    ApplicationVariant::GitRepository {
        repository: "acme/web".into(),
        branch: "main".into(),
        provider: Default::default(),
    }
}

pub fn image() -> ApplicationVariant {
    ApplicationVariant::ImageFromRegistry {
        image: "nginx".into(),
        tag: "1.27".into(),
    }
}

pub fn database() -> ApplicationVariant {
    ApplicationVariant::DatabaseCluster {
        engine: DatabaseEngine::Postgres,
        version: "16".into(),
        replicas: 1,
    }
}

pub fn cache() -> ApplicationVariant {
    ApplicationVariant::CacheCluster {
        version: "8".into(),
        replicas: 1,
    }
}

/// Keys of the children the core creates for deployment `n`.
pub fn pipeline_run_key(n: u32, generation: u64) -> ObjectKey {
    ObjectKey::new(Kind::PipelineRun, NS, format!("build-{}-g{generation}", id(n)))
}

pub fn workload_key(n: u32) -> ObjectKey {
    ObjectKey::new(Kind::Workload, NS, format!("workload-{}", id(n)))
}

pub fn service_route_key(n: u32) -> ObjectKey {
    ObjectKey::new(Kind::ServiceRoute, NS, format!("svc-{}", id(n)))
}

pub fn database_key(n: u32) -> ObjectKey {
    ObjectKey::new(Kind::DatabaseCluster, NS, format!("db-{}", id(n)))
}

pub fn cache_key(n: u32) -> ObjectKey {
    ObjectKey::new(Kind::CacheCluster, NS, format!("cache-{}", id(n)))
}

pub fn certificate_key(n: u32) -> ObjectKey {
    ObjectKey::new(Kind::Certificate, NS, format!("cert-{}", id(n)))
}
