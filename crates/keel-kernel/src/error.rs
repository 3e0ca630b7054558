use keel_store::StoreError;
use keel_types::ObjectKey;
use thiserror::Error;

use crate::identity::IdentityViolation;

/// How the host should treat a failed reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller must fix the declaration; retrying cannot help.
    Declaration,
    /// Retry with backoff.
    Transient,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Identity(#[from] IdentityViolation),
    #[error("{key}: {reason}")]
    InvalidDeclaration { key: ObjectKey, reason: String },
    #[error("{key} references missing {missing}")]
    MissingReference { key: ObjectKey, missing: ObjectKey },
    #[error("host '{host}' of {key} is already claimed by {existing}")]
    HostConflict {
        key: ObjectKey,
        host: String,
        existing: ObjectKey,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn invalid(key: &ObjectKey, reason: impl Into<String>) -> Self {
        ReconcileError::InvalidDeclaration {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ReconcileError::Store(StoreError::Serde(_) | StoreError::Malformed { .. }) => ErrorClass::Declaration,
            ReconcileError::Store(_) => ErrorClass::Transient,
            _ => ErrorClass::Declaration,
        }
    }

    /// Short machine-readable reason for status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Identity(v) => v.reason(),
            ReconcileError::InvalidDeclaration { .. } => "InvalidDeclaration",
            ReconcileError::MissingReference { .. } => "MissingReference",
            ReconcileError::HostConflict { .. } => "HostConflict",
            ReconcileError::Store(_) => "StoreError",
        }
    }
}
