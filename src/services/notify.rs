//! Outbound announcements: user notifications and conversation relays.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::Milestone;
use crate::ports::{ConversationRelay, EngineEvent, Notifier};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Logs every event. Default when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &EngineEvent) -> anyhow::Result<()> {
        info!(event = ?event, "Engine event");
        Ok(())
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("invalid webhook secret")?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// POSTs each event as JSON, signed in the `X-Signature` header.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &EngineEvent) -> anyhow::Result<()> {
        let body = serde_json::to_vec(event)?;
        let signature = sign_payload(&self.secret, &body)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .context("webhook request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}

/// Fans milestone updates out to in-process subscribers (chat gateway, websocket bridge).
#[derive(Clone)]
pub struct BroadcastRelay {
    sender: broadcast::Sender<Milestone>,
}

impl BroadcastRelay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Milestone> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastRelay {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ConversationRelay for BroadcastRelay {
    async fn milestone_updated(&self, milestone: &Milestone) -> anyhow::Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(milestone.clone());
        Ok(())
    }
}

/// Delivers `event`, logging instead of propagating a failure.
pub async fn announce(notifier: &dyn Notifier, event: EngineEvent) {
    if let Err(e) = notifier.notify(&event).await {
        warn!(error = %e, event = ?event, "Notification delivery failed");
    }
}

pub async fn relay_milestone(relay: &dyn ConversationRelay, milestone: &Milestone) {
    if let Err(e) = relay.milestone_updated(milestone).await {
        warn!(milestone_id = %milestone.id, error = %e, "Conversation relay failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use mockito::{Matcher, Server};
    use uuid::Uuid;

    fn event() -> EngineEvent {
        EngineEvent::BalanceChanged {
            user_id: Uuid::new_v4(),
            balance: BigDecimal::from(100),
            transaction_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_signature_is_hex_sha256_hmac() {
        let sig = sign_payload("secret", b"{}").unwrap();
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, sign_payload("secret", b"{}").unwrap());
        assert_ne!(sig, sign_payload("other", b"{}").unwrap());
    }

    #[tokio::test]
    async fn test_webhook_posts_signed_event() {
        let mut server = Server::new_async().await;
        let event = event();
        let body = serde_json::to_vec(&event).unwrap();
        let signature = sign_payload("whsec", &body).unwrap();

        let mock = server
            .mock("POST", "/hooks")
            .match_header(SIGNATURE_HEADER, signature.as_str())
            .match_body(Matcher::PartialJson(
                serde_json::json!({"event": "balance_changed"}),
            ))
            .with_status(204)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hooks", server.url()), "whsec");
        notifier.notify(&event).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks")
            .with_status(500)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hooks", server.url()), "whsec");
        assert!(notifier.notify(&event()).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_relay_without_subscribers_is_ok() {
        let relay = BroadcastRelay::default();
        let milestone = Milestone {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            conversation_id: None,
            title: "Design".to_string(),
            description: String::new(),
            balance: BigDecimal::from(20),
            status: crate::domain::MilestoneStatus::Draft,
            version: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        assert!(relay.milestone_updated(&milestone).await.is_ok());

        let mut rx = relay.subscribe();
        relay.milestone_updated(&milestone).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().id, milestone.id);
    }
}
