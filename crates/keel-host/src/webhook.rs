//! Outbound phase-transition webhooks.
//!
//! The engine hands events to [`WebhookNotifier`] synchronously; a
//! [`WebhookWorker`] posts them in the background. A full queue or a
//! delivery that keeps failing drops the event and logs it.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use keel_kernel::{NotifyError, TransitionEvent, TransitionSink};
use keel_types::{Kind, Phase};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::{broadcast, mpsc};

use crate::config::WebhookConfig;
use crate::controller::Backoff;
use crate::error::HostError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Keel-Signature";
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
    pub identifier: Option<String>,
    pub slug: Option<String>,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// `<kind>.status.changed`, kind in lowercase.
    #[serde(rename = "type")]
    pub event_type: String,
    pub previous_phase: Phase,
    pub new_phase: Phase,
    pub resource: ResourceRef,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
}

impl From<&TransitionEvent> for WebhookPayload {
    fn from(event: &TransitionEvent) -> Self {
        Self {
            event_type: format!("{}.status.changed", event.key.kind.as_str().to_ascii_lowercase()),
            previous_phase: event.previous,
            new_phase: event.next,
            resource: ResourceRef {
                kind: event.key.kind,
                namespace: event.key.namespace.clone(),
                name: event.key.name.clone(),
                identifier: event.identifier.clone(),
                slug: event.slug.clone(),
                generation: event.generation,
            },
            timestamp: event.at_ns,
        }
    }
}

/// `sha256=<hex hmac>` over the exact request body.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, HostError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| HostError::Webhook(e.to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// 408, 429 and every 5xx are worth another attempt.
pub fn is_retryable(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Posts `body` and returns the response status code.
    async fn post(&self, body: Vec<u8>, signature: Option<&str>) -> Result<u16, HostError>;
}

pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HostError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::Webhook(format!("build http client: {e}")))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, body: Vec<u8>, signature: Option<&str>) -> Result<u16, HostError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        let response = request.send().await.map_err(|e| HostError::Webhook(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    tx: mpsc::Sender<TransitionEvent>,
}

impl TransitionSink for WebhookNotifier {
    fn notify(&self, event: &TransitionEvent) -> Result<(), NotifyError> {
        self.tx.try_send(event.clone()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => NotifyError::Delivery("webhook queue full".into()),
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

pub struct WebhookWorker<T> {
    rx: mpsc::Receiver<TransitionEvent>,
    transport: T,
    secret: Option<Vec<u8>>,
    retry: Backoff,
    max_attempts: u32,
}

/// Notifier and worker sharing one queue, delivering through `transport`.
pub fn channel<T: WebhookTransport>(transport: T, config: &WebhookConfig) -> (WebhookNotifier, WebhookWorker<T>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let worker = WebhookWorker {
        rx,
        transport,
        secret: config.secret.as_ref().map(|s| s.as_bytes().to_vec()),
        retry: Backoff {
            base: config.retry_base,
            cap: MAX_RETRY_DELAY,
        },
        max_attempts: config.max_attempts.max(1),
    };
    (WebhookNotifier { tx }, worker)
}

/// HTTP notifier for `config.url`.
pub fn http(config: &WebhookConfig) -> Result<(WebhookNotifier, WebhookWorker<HttpTransport>), HostError> {
    let transport = HttpTransport::new(config.url.clone(), config.timeout)?;
    Ok(channel(transport, config))
}

impl<T: WebhookTransport> WebhookWorker<T> {
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = self.rx.recv() => match event {
                    Some(event) => {
                        if let Err(err) = self.deliver(&event).await {
                            tracing::warn!(key = %event.key, "dropping transition webhook: {err}");
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("webhook worker stopped");
    }

    /// Posts one event, retrying retryable statuses and transport errors.
    pub async fn deliver(&self, event: &TransitionEvent) -> Result<u16, HostError> {
        let body = serde_json::to_vec(&WebhookPayload::from(event)).map_err(|e| HostError::Webhook(e.to_string()))?;
        let signature = match &self.secret {
            Some(secret) => Some(sign(secret, &body)?),
            None => None,
        };

        let mut attempt = 1;
        loop {
            let outcome = self.transport.post(body.clone(), signature.as_deref()).await;
            let failure = match outcome {
                Ok(status) if !is_retryable(status) => {
                    if status >= 400 {
                        return Err(HostError::Webhook(format!("receiver answered {status}")));
                    }
                    tracing::debug!(key = %event.key, status, "transition webhook delivered");
                    return Ok(status);
                }
                Ok(status) => HostError::Webhook(format!("receiver answered {status}")),
                Err(err) => err,
            };
            if attempt >= self.max_attempts {
                return Err(failure);
            }
            let delay = self.retry.delay(attempt);
            tracing::debug!(key = %event.key, attempt, ?delay, "webhook attempt failed: {failure}");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::ObjectKey;

    #[test]
    fn signature_matches_known_vector() {
        let signature = sign(b"key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            signature,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn payload_uses_camel_case_fields() {
        let event = TransitionEvent {
            key: ObjectKey::new(Kind::Deployment, "team", "web-1"),
            identifier: Some("00000000-0000-4000-8000-0000000000d1".into()),
            slug: Some("web-1".into()),
            previous: Phase::Building,
            next: Phase::Deploying,
            generation: 2,
            at_ns: 42,
        };
        let value = serde_json::to_value(WebhookPayload::from(&event)).unwrap();
        assert_eq!(value["type"], "deployment.status.changed");
        assert_eq!(value["previousPhase"], "Building");
        assert_eq!(value["newPhase"], "Deploying");
        assert_eq!(value["resource"]["name"], "web-1");
        assert_eq!(value["resource"]["kind"], "Deployment");
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(429));
        assert!(is_retryable(503));
        assert!(is_retryable(408));
        assert!(!is_retryable(404));
        assert!(!is_retryable(204));
    }
}
