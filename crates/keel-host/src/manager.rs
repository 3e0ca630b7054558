//! Routes store change notifications to the reconcile loops and drives
//! periodic resync.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use keel_kernel::Engine;
use keel_store::{ListParams, Store, WatchEvent, WatchEventKind};
use keel_types::{Kind, ManagedResource, Object, ObjectKey};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::HostConfig;
use crate::controller::{Backoff, Controller, LoopClass};
use crate::error::HostError;

pub struct Manager<S> {
    store: Arc<S>,
    controllers: BTreeMap<LoopClass, Arc<Controller<S>>>,
    resync_interval: Duration,
}

impl<S: Store + 'static> Manager<S> {
    pub fn new(engine: Engine<S>, config: &HostConfig) -> Self {
        let backoff = Backoff {
            base: config.backoff_base,
            cap: config.backoff_cap,
        };
        let controllers = LoopClass::ALL
            .into_iter()
            .map(|class| {
                let concurrency = match class {
                    LoopClass::Mutating => config.mutating_concurrency,
                    LoopClass::Progress => config.progress_concurrency,
                    LoopClass::Mirroring => config.mirroring_concurrency,
                };
                (class, Arc::new(Controller::new(class, engine.clone(), concurrency, backoff)))
            })
            .collect();
        Self {
            store: engine.store().clone(),
            controllers,
            resync_interval: config.resync_interval,
        }
    }

    pub fn controller(&self, class: LoopClass) -> Option<&Arc<Controller<S>>> {
        self.controllers.get(&class)
    }

    pub fn enqueue(&self, key: ObjectKey) {
        if let Some(controller) = self.controllers.get(&LoopClass::of(key.kind)) {
            controller.enqueue(key);
        }
    }

    /// A managed change wakes the resource and its parent. An external
    /// change wakes its projector; creation and removal also wake the owners,
    /// whose required-children check or cascade depends on it.
    pub fn route(&self, event: &WatchEvent) {
        let key = &event.key;
        if key.kind.is_managed() {
            self.enqueue(key.clone());
            if let Some(parent) = &event.parent {
                self.enqueue(parent.clone());
            }
            return;
        }

        if event.kind != WatchEventKind::Deleted {
            self.enqueue(key.clone());
        }
        if event.kind != WatchEventKind::Modified {
            for owner in &event.owner_refs {
                self.enqueue(ObjectKey::new(owner.kind, key.namespace.clone(), owner.name.clone()));
            }
        }
    }

    /// Enqueues every managed resource. Returns how many were enqueued.
    pub fn resync(&self) -> Result<usize, HostError> {
        let mut count = 0;
        for kind in Kind::MANAGED {
            for resource in self.store.list::<ManagedResource>(&ListParams::kind(kind))? {
                self.enqueue(resource.key());
                count += 1;
            }
        }
        Ok(count)
    }

    /// Every queue is drained and no reconcile is running.
    pub fn is_idle(&self) -> bool {
        self.controllers.values().all(|c| c.queue().is_idle())
    }

    /// Runs until `shutdown` fires or the store's watch channel closes.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<(), HostError> {
        let mut events = self.store.subscribe();
        let mut stop = shutdown.subscribe();
        let workers: Vec<_> = self
            .controllers
            .values()
            .map(|controller| tokio::spawn(controller.clone().run(shutdown.subscribe())))
            .collect();

        let initial = self.resync()?;
        tracing::info!(resources = initial, "control plane started");

        let mut resync = tokio::time::interval(self.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        resync.tick().await;

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                _ = resync.tick() => match self.resync() {
                    Ok(count) => tracing::debug!(resources = count, "periodic resync"),
                    Err(err) => tracing::warn!("periodic resync failed: {err}"),
                },
                event = events.recv() => match event {
                    Ok(event) => self.route(&event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "watch lagged; resyncing");
                        if let Err(err) = self.resync() {
                            tracing::warn!("resync after lag failed: {err}");
                        }
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("store watch closed");
                        let _ = shutdown.send(());
                        break;
                    }
                },
            }
        }

        futures::future::join_all(workers).await;
        tracing::info!("control plane stopped");
        Ok(())
    }
}
