//! Per-class work queues.
//!
//! A key is reconciled by at most one task at a time. Triggers that arrive
//! while a key is queued collapse into the queued entry; triggers that
//! arrive while it is in flight mark it dirty and it runs once more after
//! the current pass.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use keel_kernel::{Action, Engine, ErrorClass};
use keel_store::Store;
use keel_types::{Kind, ObjectKey};
use tokio::sync::{Notify, Semaphore, broadcast};

/// Concurrency class of a reconcile loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoopClass {
    /// Projects, environments and applications: create structural children.
    Mutating,
    /// Deployments and domains: follow work that progresses outside the core.
    Progress,
    /// Status projectors over external kinds.
    Mirroring,
}

impl LoopClass {
    pub const ALL: [LoopClass; 3] = [LoopClass::Mutating, LoopClass::Progress, LoopClass::Mirroring];

    pub fn of(kind: Kind) -> Self {
        match kind {
            Kind::Project | Kind::Environment | Kind::Application => LoopClass::Mutating,
            Kind::Deployment | Kind::Domain => LoopClass::Progress,
            _ => LoopClass::Mirroring,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    order: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.order.push_back(key);
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Takes the next key and marks it in flight.
    pub fn try_take(&self) -> Option<ObjectKey> {
        let mut state = self.lock();
        let key = state.order.pop_front()?;
        state.queued.remove(&key);
        state.in_flight.insert(key.clone());
        Some(key)
    }

    pub async fn next(&self) -> ObjectKey {
        loop {
            if let Some(key) = self.try_take() {
                return key;
            }
            self.ready.notified().await;
        }
    }

    /// Ends the pass for `key`; a dirty key goes straight back on the queue.
    pub fn done(&self, key: &ObjectKey) {
        let requeue = {
            let mut state = self.lock();
            state.in_flight.remove(key);
            state.dirty.remove(key)
        };
        if requeue {
            self.enqueue(key.clone());
        }
    }

    pub fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut state = self.lock();
        let attempts = state.failures.entry(key.clone()).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn forget_failures(&self, key: &ObjectKey) {
        self.lock().failures.remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.order.is_empty() && state.in_flight.is_empty()
    }
}

/// Exponential backoff between `base` and `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }
}

/// Drains one [`WorkQueue`] through the engine.
pub struct Controller<S> {
    class: LoopClass,
    engine: Engine<S>,
    queue: Arc<WorkQueue>,
    permits: Arc<Semaphore>,
    backoff: Backoff,
}

impl<S: Store + 'static> Controller<S> {
    pub fn new(class: LoopClass, engine: Engine<S>, concurrency: usize, backoff: Backoff) -> Self {
        Self {
            class,
            engine,
            queue: Arc::new(WorkQueue::new()),
            permits: Arc::new(Semaphore::new(concurrency.clamp(1, Semaphore::MAX_PERMITS))),
            backoff,
        }
    }

    pub fn class(&self) -> LoopClass {
        self.class
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.enqueue(key);
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(class = ?self.class, "controller started");
        loop {
            let key = tokio::select! {
                _ = shutdown.recv() => break,
                key = self.queue.next() => key,
            };
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            tokio::spawn(async move {
                this.process(key).await;
                drop(permit);
            });
        }
        tracing::debug!(class = ?self.class, "controller stopped");
    }

    /// One reconcile pass for `key` followed by its follow-up scheduling.
    pub async fn process(&self, key: ObjectKey) {
        let engine = self.engine.clone();
        let target = key.clone();
        let result = tokio::task::spawn_blocking(move || engine.reconcile(&target)).await;

        let followup = match result {
            Ok(Ok(action)) => {
                self.queue.forget_failures(&key);
                match action {
                    Action::Done => None,
                    Action::Requeue => Some(Duration::ZERO),
                    Action::RequeueAfter(delay) => Some(delay),
                }
            }
            Ok(Err(err)) if err.class() == ErrorClass::Declaration => {
                tracing::warn!(%key, reason = err.reason(), "not retrying: {err}");
                self.queue.forget_failures(&key);
                None
            }
            Ok(Err(err)) => {
                let attempts = self.queue.record_failure(&key);
                let delay = self.backoff.delay(attempts);
                tracing::debug!(%key, attempts, ?delay, "reconcile failed: {err}");
                Some(delay)
            }
            Err(join) => {
                let attempts = self.queue.record_failure(&key);
                tracing::error!(%key, "reconcile task aborted: {join}");
                Some(self.backoff.delay(attempts))
            }
        };

        self.queue.done(&key);
        match followup {
            None => {}
            Some(delay) if delay.is_zero() => self.queue.enqueue(key),
            Some(delay) => {
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.enqueue(key);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(Kind::Project, "default", name)
    }

    #[test]
    fn queued_triggers_coalesce() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_take(), Some(key("a")));
        assert_eq!(queue.try_take(), Some(key("b")));
        assert_eq!(queue.try_take(), None);
    }

    #[test]
    fn in_flight_keys_are_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        let taken = queue.try_take().unwrap();
        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        assert_eq!(queue.try_take(), None);
        assert!(!queue.is_idle());

        queue.done(&taken);
        assert_eq!(queue.try_take(), Some(key("a")));
        queue.done(&key("a"));
        assert!(queue.is_idle());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let backoff = Backoff {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(60),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(1600));
        assert_eq!(backoff.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn failures_accumulate_until_forgotten() {
        let queue = WorkQueue::new();
        assert_eq!(queue.record_failure(&key("a")), 1);
        assert_eq!(queue.record_failure(&key("a")), 2);
        queue.forget_failures(&key("a"));
        assert_eq!(queue.record_failure(&key("a")), 1);
    }

    #[test]
    fn kinds_map_to_loop_classes() {
        assert_eq!(LoopClass::of(Kind::Application), LoopClass::Mutating);
        assert_eq!(LoopClass::of(Kind::Domain), LoopClass::Progress);
        assert_eq!(LoopClass::of(Kind::Certificate), LoopClass::Mirroring);
    }
}
