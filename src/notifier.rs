use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

/// key: event-notifier -> lifecycle/refund event boundary
///
/// Delivery guarantees, retries and receiver-side verification live outside
/// the core; callers log and swallow errors so a mutation that already
/// succeeded is never rolled back by a notification problem.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn emit(&self, event: &str, merchant_id: Uuid, payload: Value) -> Result<()>;
}

/// Posts events to a single configured endpoint, signing the body with
/// HMAC-SHA256 when a shared secret is set.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(endpoint: String, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            client,
            endpoint,
            secret,
        })
    }

    fn signature(&self, body: &[u8]) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl EventNotifier for WebhookNotifier {
    async fn emit(&self, event: &str, merchant_id: Uuid, payload: Value) -> Result<()> {
        let envelope = json!({
            "event": event,
            "merchant_id": merchant_id,
            "created_at": Utc::now(),
            "data": payload,
        });
        let body = serde_json::to_vec(&envelope).context("failed to encode webhook body")?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .body(body.clone());
        if let Some(signature) = self.signature(&body) {
            request = request.header("x-paygate-signature", signature);
        }

        let response = request.send().await.context("webhook delivery failed")?;
        response
            .error_for_status()
            .context("webhook endpoint rejected delivery")?;
        Ok(())
    }
}

/// No-op notifier used when no endpoint is configured and in tests.
pub struct NullNotifier;

#[async_trait]
impl EventNotifier for NullNotifier {
    async fn emit(&self, _event: &str, _merchant_id: Uuid, _payload: Value) -> Result<()> {
        Ok(())
    }
}
