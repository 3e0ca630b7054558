//! Phase transition notifications.
//!
//! Sinks are best-effort: the engine logs a failed delivery and moves on, the
//! status write it follows is never rolled back.

use std::sync::Mutex;

use keel_types::{ObjectKey, Phase};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub key: ObjectKey,
    pub identifier: Option<String>,
    pub slug: Option<String>,
    pub previous: Phase,
    pub next: Phase,
    pub generation: u64,
    pub at_ns: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification sink closed")]
    Closed,
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

pub trait TransitionSink: Send + Sync {
    fn notify(&self, event: &TransitionEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TransitionSink for NoopSink {
    fn notify(&self, _event: &TransitionEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Phases `key` moved through, in order, starting with its first `previous`.
    pub fn phases_of(&self, key: &ObjectKey) -> Vec<Phase> {
        let mut phases = Vec::new();
        for event in self.events().into_iter().filter(|e| &e.key == key) {
            if phases.is_empty() {
                phases.push(event.previous);
            }
            phases.push(event.next);
        }
        phases
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }
}

impl TransitionSink for RecordingSink {
    fn notify(&self, event: &TransitionEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .map_err(|_| NotifyError::Closed)?
            .push(event.clone());
        Ok(())
    }
}
