#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use keel_host::{HostConfig, HostError, Manager};
use keel_kernel::{Engine, OperatorConfig, RecordingSink, TransitionSink};
use keel_store::{MemStore, Store};
use keel_types::{
    ApplicationSpec, ApplicationVariant, DeploymentSpec, EnvironmentSpec, ManagedResource, ObjectKey, ObjectMeta,
    Phase, ProjectSpec, ResourceSpec, labels,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const NS: &str = "team";

pub fn id(n: u32) -> String {
    format!("00000000-0000-4000-8000-{n:012x}")
}

pub fn host_config() -> HostConfig {
    HostConfig {
        backoff_base: Duration::from_millis(5),
        backoff_cap: Duration::from_millis(100),
        resync_interval: Duration::from_secs(3600),
        ..HostConfig::default()
    }
}

pub fn operator_config() -> OperatorConfig {
    let mut config = OperatorConfig::new("apps.example.com").unwrap();
    config.cascade_recheck = Duration::from_millis(20);
    config.pending_recheck = Duration::from_millis(50);
    config
}

/// A running control plane over an in-memory store.
pub struct Plane {
    pub store: Arc<MemStore>,
    pub sink: Arc<RecordingSink>,
    pub manager: Arc<Manager<MemStore>>,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<Result<(), HostError>>,
}

pub async fn start() -> Plane {
    start_with_sink(None).await
}

pub async fn start_with_sink(extra: Option<Arc<dyn TransitionSink>>) -> Plane {
    let store = Arc::new(MemStore::new());
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::new(store.clone(), operator_config()).with_sink(extra.unwrap_or_else(|| sink.clone()));
    let manager = Arc::new(Manager::new(engine, &host_config()));
    let (shutdown, _) = broadcast::channel(1);
    let handle = {
        let manager = manager.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { manager.run(shutdown).await })
    };
    // Let the manager subscribe before the test starts writing.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    Plane {
        store,
        sink,
        manager,
        shutdown,
        handle,
    }
}

impl Plane {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
    }

    pub fn declare(&self, spec: ResourceSpec, name: &str, parent: Option<&str>, n: u32) -> ObjectKey {
        let kind = spec.kind();
        let mut meta = ObjectMeta::new(kind, NS, name)
            .with_label(labels::IDENTIFIER, id(n))
            .with_label(labels::SLUG, name);
        if let (Some(parent), Some(parent_kind)) = (parent, kind.parent_kind()) {
            meta = meta.with_parent(parent_kind, parent);
        }
        self.store.create(&ManagedResource::new(meta, spec)).unwrap().meta.key()
    }

    /// Project `acme`, environment `prod`, application `web`.
    pub fn hierarchy(&self, variant: ApplicationVariant) -> [ObjectKey; 3] {
        let project = self.declare(ResourceSpec::Project(ProjectSpec::default()), "acme", None, 1);
        let env = self.declare(ResourceSpec::Environment(EnvironmentSpec::default()), "prod", Some("acme"), 2);
        let app = self.declare(
            ResourceSpec::Application(ApplicationSpec {
                variant,
                port: None,
                current_deployment: None,
            }),
            "web",
            Some("prod"),
            3,
        );
        [project, env, app]
    }

    pub fn deployment(&self, name: &str, n: u32) -> ObjectKey {
        self.declare(
            ResourceSpec::Deployment(DeploymentSpec {
                commit_sha: None,
                promote: false,
            }),
            name,
            Some("web"),
            n,
        )
    }

    pub fn resource(&self, key: &ObjectKey) -> Option<ManagedResource> {
        self.store.get(key).unwrap()
    }

    pub fn phase(&self, key: &ObjectKey) -> Option<Phase> {
        self.resource(key).map(|r| r.status.phase)
    }
}

pub fn image() -> ApplicationVariant {
    ApplicationVariant::ImageFromRegistry {
        image: "nginx".into(),
        tag: "1.27".into(),
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
