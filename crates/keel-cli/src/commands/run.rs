//! `keel run` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use keel_host::{HostConfig, Manager, webhook};
use keel_kernel::{Engine, NoopSink, OperatorConfig, TransitionSink};
use keel_store::{ListParams, MemStore, Store};
use keel_types::{Kind, ManagedResource};
use serde_json::json;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::opts::OutputOpts;
use crate::output::print_success;
use crate::seed;

/// Consecutive idle polls before `--until-idle` stops.
const IDLE_POLLS: u32 = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Objects to load into the store before starting
    #[arg(long)]
    pub seed: Option<PathBuf>,

    /// Base domain for generated default hosts
    #[arg(long, env = "KEEL_OPERATOR_DOMAIN")]
    pub domain: String,

    /// Port used when an application does not declare one
    #[arg(long, env = "KEEL_DEFAULT_PORT")]
    pub default_port: Option<u16>,

    /// Stop once every queue has drained and print the resulting phases
    #[arg(long)]
    pub until_idle: bool,

    /// Give up on --until-idle after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

pub async fn cmd_run(opts: &OutputOpts, args: &RunArgs) -> Result<()> {
    setup_logging();

    let mut operator = OperatorConfig::new(args.domain.clone())?;
    if let Some(port) = args.default_port {
        operator = operator.with_default_port(port)?;
    }
    let host = HostConfig::from_env()?;

    let store = Arc::new(MemStore::new());
    if let Some(path) = &args.seed {
        let seed = seed::load(path)?;
        for resource in &seed.resources {
            store
                .create(resource)
                .with_context(|| format!("seed {}", resource.meta.key()))?;
        }
        for object in &seed.external {
            store
                .create(object)
                .with_context(|| format!("seed {}", object.meta.key()))?;
        }
        tracing::info!(
            resources = seed.resources.len(),
            external = seed.external.len(),
            "store seeded"
        );
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let sink: Arc<dyn TransitionSink> = match &host.webhook {
        Some(config) => {
            let (notifier, worker) = webhook::http(config)?;
            tokio::spawn(worker.run(shutdown_tx.subscribe()));
            tracing::info!(url = %config.url, "transition webhooks enabled");
            Arc::new(notifier)
        }
        None => Arc::new(NoopSink),
    };

    let engine = Engine::new(store.clone(), operator).with_sink(sink);
    let manager = Arc::new(Manager::new(engine, &host));
    let handle = {
        let manager = manager.clone();
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move { manager.run(shutdown).await })
    };

    if args.until_idle {
        let settled = wait_until_idle(&manager, Duration::from_secs(args.timeout_secs)).await;
        let _ = shutdown_tx.send(());
        handle.await??;
        if !settled {
            anyhow::bail!("control plane did not settle within {}s", args.timeout_secs);
        }
        return print_success(opts, summary(store.as_ref())?);
    }

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down...");
            }
            _ = async {
                if let Some(ref mut t) = term { t.recv().await; }
            } => {
                tracing::info!("SIGTERM received, shutting down...");
            }
        }
        let _ = signal_tx.send(());
    });
    handle.await??;
    Ok(())
}

async fn wait_until_idle(manager: &Manager<MemStore>, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut idle_polls = 0;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        if manager.is_idle() {
            idle_polls += 1;
            if idle_polls >= IDLE_POLLS {
                return true;
            }
        } else {
            idle_polls = 0;
        }
    }
    false
}

fn summary(store: &MemStore) -> Result<serde_json::Value> {
    let mut rows = Vec::new();
    for kind in Kind::MANAGED {
        for resource in store.list::<ManagedResource>(&ListParams::kind(kind))? {
            rows.push(json!({
                "key": resource.meta.key().to_string(),
                "phase": resource.status.phase,
                "message": resource.status.message,
            }));
        }
    }
    Ok(json!({ "resources": rows }))
}

/// Logs go to stderr so command output stays parseable.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
