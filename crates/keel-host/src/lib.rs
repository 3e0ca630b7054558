//! Async runtime around the reconcile kernel.
//!
//! The [`Manager`] subscribes to the store, fans change notifications out to
//! one [`Controller`] per loop class and re-lists everything periodically.
//! Each controller runs the kernel's synchronous `Engine::reconcile` on the
//! blocking pool, one task per key at a time.

pub mod config;
pub mod controller;
pub mod error;
pub mod manager;
pub mod webhook;

pub use config::{HostConfig, WebhookConfig};
pub use controller::{Backoff, Controller, LoopClass, WorkQueue};
pub use error::HostError;
pub use manager::Manager;
pub use webhook::{WebhookNotifier, WebhookPayload, WebhookTransport, WebhookWorker};
