use keel_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid host configuration: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("webhook error: {0}")]
    Webhook(String),
}
