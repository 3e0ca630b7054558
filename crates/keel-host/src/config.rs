use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::HostError;

pub const WEBHOOK_URL_ENV: &str = "KEEL_WEBHOOK_URL";
pub const WEBHOOK_SECRET_ENV: &str = "KEEL_WEBHOOK_SECRET";
pub const RESYNC_ENV: &str = "KEEL_RESYNC_INTERVAL_SECS";
pub const CONCURRENCY_ENV: &str = "KEEL_MAX_CONCURRENT_RECONCILES";

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Kinds whose reconcile creates structural children.
    pub mutating_concurrency: usize,
    /// Kinds that follow externally progressing work (deployments, domains).
    pub progress_concurrency: usize,
    /// Status projectors; cheaper and far more frequent.
    pub mirroring_concurrency: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Full re-list of every managed resource.
    pub resync_interval: Duration,
    pub webhook: Option<WebhookConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            mutating_concurrency: 10,
            progress_concurrency: 20,
            mirroring_concurrency: 50,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(60),
            resync_interval: Duration::from_secs(300),
            webhook: None,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self, HostError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(RESYNC_ENV).filter(|v| !v.is_empty()) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| HostError::Config(format!("{RESYNC_ENV}={raw} is not a number of seconds")))?;
            if secs == 0 {
                return Err(HostError::Config(format!("{RESYNC_ENV} must be positive")));
            }
            config.resync_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(CONCURRENCY_ENV).filter(|v| !v.is_empty()) {
            let limit: usize = raw
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| HostError::Config(format!("{CONCURRENCY_ENV}={raw} must be a positive integer")))?;
            let mirroring = limit
                .checked_mul(5)
                .filter(|n| *n <= Semaphore::MAX_PERMITS)
                .ok_or_else(|| HostError::Config(format!("{CONCURRENCY_ENV}={raw} is too large")))?;
            config.mutating_concurrency = limit;
            config.progress_concurrency = limit * 2;
            config.mirroring_concurrency = mirroring;
        }
        if let Some(url) = lookup(WEBHOOK_URL_ENV).filter(|v| !v.is_empty()) {
            let mut webhook = WebhookConfig::new(url);
            webhook.secret = lookup(WEBHOOK_SECRET_ENV).filter(|v| !v.is_empty());
            config.webhook = Some(webhook);
        }
        Ok(config)
    }
}

/// Outbound transition notifications.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// HMAC-SHA256 key for the `X-Keel-Signature` header; unsigned when absent.
    pub secret: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub queue_capacity: usize,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            timeout: Duration::from_secs(10),
            max_attempts: 5,
            retry_base: Duration::from_millis(500),
            queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = HostConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.mutating_concurrency, 10);
        assert_eq!(config.progress_concurrency, 20);
        assert_eq!(config.mirroring_concurrency, 50);
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert!(config.webhook.is_none());
    }

    #[test]
    fn webhook_and_overrides() {
        let config = HostConfig::from_lookup(lookup(&[
            (WEBHOOK_URL_ENV, "http://hooks.internal/keel"),
            (WEBHOOK_SECRET_ENV, "s3cret"),
            (CONCURRENCY_ENV, "4"),
            (RESYNC_ENV, "60"),
        ]))
        .unwrap();
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.url, "http://hooks.internal/keel");
        assert_eq!(webhook.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.mirroring_concurrency, 20);
        assert_eq!(config.resync_interval, Duration::from_secs(60));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(HostConfig::from_lookup(lookup(&[(CONCURRENCY_ENV, "0")])).is_err());
        assert!(HostConfig::from_lookup(lookup(&[(RESYNC_ENV, "soon")])).is_err());
    }

    #[test]
    fn concurrency_beyond_the_permit_limit_is_rejected() {
        let huge = usize::MAX.to_string();
        assert!(HostConfig::from_lookup(lookup(&[(CONCURRENCY_ENV, huge.as_str())])).is_err());
        let just_over = (Semaphore::MAX_PERMITS / 5 + 1).to_string();
        assert!(HostConfig::from_lookup(lookup(&[(CONCURRENCY_ENV, just_over.as_str())])).is_err());

        let largest = Semaphore::MAX_PERMITS / 5;
        let config = HostConfig::from_lookup(lookup(&[(CONCURRENCY_ENV, largest.to_string().as_str())])).unwrap();
        assert_eq!(config.mirroring_concurrency, largest * 5);
    }
}
