//! Reconciliation kernel: identity invariants, the phase machine, status
//! mirroring, per-kind reconcilers and the finalizer cascade.
//!
//! Everything here is synchronous and runs one reconcile at a time; the host
//! decides when and how often each key is reconciled.

pub mod children;
pub mod clock;
pub mod config;
pub mod correlation;
pub mod error;
pub mod finalizer;
pub mod identity;
pub mod notify;
pub mod phase;
pub mod reconcile;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, OperatorConfig};
pub use correlation::{CorrelationIndex, ProjectionOutcome, Projector};
pub use error::{ErrorClass, ReconcileError};
pub use finalizer::{CascadeState, cascade_kinds, enumerate_children, finalizer_for};
pub use identity::{IdentityField, IdentityViolation, check_identity, check_population};
pub use notify::{NoopSink, NotifyError, RecordingSink, TransitionEvent, TransitionSink};
pub use phase::next_phase;
pub use reconcile::{Action, Engine};
