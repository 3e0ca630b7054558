use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use keel_kernel::{Action, Clock, Engine, ErrorClass, ManualClock, OperatorConfig, RecordingSink};
use keel_store::{ListParams, MemStore, Store, WatchEvent, WatchEventKind};
use keel_types::{ExternalObject, Kind, ManagedResource, Object, ObjectKey, Phase};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::fixtures;

/// Upper bound on reconcile passes in one `settle`; exceeding it means a loop.
const MAX_PASSES: usize = 10_000;
const START_NS: u64 = 1_000_000;

/// Single-threaded world: a store, an engine, and a queue fed by the
/// store's change notifications. Delayed requeues wait for [`TestWorld::advance`].
pub struct TestWorld {
    pub store: Arc<MemStore>,
    pub engine: Engine<MemStore>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
    events: broadcast::Receiver<WatchEvent>,
    queue: VecDeque<ObjectKey>,
    timers: Vec<(u64, ObjectKey)>,
    rejected: BTreeMap<ObjectKey, String>,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_config(fixtures::operator_config())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(START_NS));
        let engine = Engine::new(store.clone(), config)
            .with_sink(sink.clone())
            .with_clock(clock.clone());
        let events = store.subscribe();
        Self {
            store,
            engine,
            sink,
            clock,
            events,
            queue: VecDeque::new(),
            timers: Vec::new(),
            rejected: BTreeMap::new(),
        }
    }

    /// Submits a declaration; it is reconciled on the next `settle`.
    pub fn apply(&mut self, resource: ManagedResource) -> ObjectKey {
        self.store.create(&resource).unwrap().key()
    }

    pub fn delete(&mut self, key: &ObjectKey) {
        self.store.delete(key).unwrap();
    }

    pub fn get(&self, key: &ObjectKey) -> Option<ManagedResource> {
        self.store.get(key).unwrap()
    }

    pub fn external(&self, key: &ObjectKey) -> Option<ExternalObject> {
        self.store.get(key).unwrap()
    }

    pub fn phase(&self, key: &ObjectKey) -> Option<Phase> {
        self.get(key).map(|r| r.status.phase)
    }

    /// Last declaration error reported for `key`, if its latest pass failed.
    pub fn rejection(&self, key: &ObjectKey) -> Option<&str> {
        self.rejected.get(key).map(String::as_str)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn enqueue(&mut self, key: ObjectKey) {
        if !self.queue.contains(&key) {
            self.queue.push_back(key);
        }
    }

    /// Enqueues every managed resource, like a periodic resync.
    pub fn resync(&mut self) {
        for kind in Kind::MANAGED {
            for resource in self.store.list::<ManagedResource>(&ListParams::kind(kind)).unwrap() {
                self.enqueue(resource.key());
            }
        }
    }

    fn route(&mut self, event: WatchEvent) {
        if event.key.kind.is_managed() {
            self.enqueue(event.key.clone());
            if let Some(parent) = event.parent {
                self.enqueue(parent);
            }
            return;
        }
        if event.kind != WatchEventKind::Deleted {
            self.enqueue(event.key.clone());
        }
        if event.kind != WatchEventKind::Modified {
            for owner in event.owner_refs {
                self.enqueue(ObjectKey::new(owner.kind, event.key.namespace.clone(), owner.name));
            }
        }
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.route(event),
                Err(TryRecvError::Lagged(missed)) => {
                    log::debug!("test world lagged by {missed} events; resyncing");
                    self.resync();
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Reconciles until the queue is empty and no notification is pending.
    /// Returns the number of passes.
    pub fn settle(&mut self) -> usize {
        let mut passes = 0;
        loop {
            self.drain_events();
            let Some(key) = self.queue.pop_front() else {
                return passes;
            };
            passes += 1;
            assert!(passes <= MAX_PASSES, "world did not settle; last key {key}");

            match self.engine.reconcile(&key) {
                Ok(action) => {
                    self.rejected.remove(&key);
                    match action {
                        Action::Done => {}
                        Action::Requeue => self.enqueue(key),
                        Action::RequeueAfter(delay) => self.schedule(key, delay),
                    }
                }
                Err(err) if err.class() == ErrorClass::Declaration => {
                    self.rejected.insert(key, err.to_string());
                }
                Err(err) => {
                    log::debug!("transient failure on {key}: {err}");
                    self.enqueue(key);
                }
            }
        }
    }

    fn schedule(&mut self, key: ObjectKey, delay: Duration) {
        let due = self.now() + delay.as_nanos() as u64;
        if !self.timers.iter().any(|(_, k)| *k == key) {
            self.timers.push((due, key));
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Moves the clock forward, fires due requeues and settles again.
    pub fn advance(&mut self, by: Duration) -> usize {
        self.clock.advance(by.as_nanos() as u64);
        let now = self.now();
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.timers = later;
        for (_, key) in due {
            self.enqueue(key);
        }
        self.settle()
    }
}
