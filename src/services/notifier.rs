// src/services/notifier.rs
//! Real-time delivery of verification outcomes.
//!
//! Outcomes are pushed to named channels (`verifier-{verifierId}`) as named
//! events. Delivery is best-effort: a failed publish is reported to the
//! caller of [`NotificationPublisher::publish`] for logging and is never
//! retried.

use crate::models::subject::AccountId;
use crate::models::verification::NotificationPayload;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Event name for a completed verification.
pub const NEW_VERIFICATION_EVENT: &str = "new-verification";

/// Channel a verifier's live session listens on.
pub fn verifier_channel(verifier: &AccountId) -> String {
    format!("verifier-{}", verifier)
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("notification relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification relay rejected the event with status {0}")]
    Rejected(u16),

    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Pub/sub port: named channels carrying named events.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), NotifyError>;
}

/// Frame delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

/// In-process pub/sub hub backing the WebSocket endpoint.
///
/// Channels are created lazily on first subscribe or publish. Publishing to
/// a channel nobody is listening on succeeds and drops the event.
pub struct BroadcastHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<ChannelMessage>>>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches a new receiver to `channel`.
    pub fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<ChannelMessage>, NotifyError> {
        Ok(self.sender(channel)?.subscribe())
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<ChannelMessage>, NotifyError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| NotifyError::Unavailable("channel registry poisoned".into()))?;
        // Drop senders whose last session went away so idle verifiers do not pile up.
        channels.retain(|name, tx| name == channel || tx.receiver_count() > 0);
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone())
    }
}

#[cfg(test)]
impl BroadcastHub {
    /// Number of live receivers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .map(|channels| channels.get(channel).map_or(0, |tx| tx.receiver_count()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl NotificationChannel for BroadcastHub {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), NotifyError> {
        let message = ChannelMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            data: payload,
        };
        match self.sender(channel)?.send(message) {
            Ok(receivers) => log::debug!("Delivered {} on {} to {} session(s)", event, channel, receivers),
            Err(_) => log::debug!("No live session on {}; {} dropped", channel, event),
        }
        Ok(())
    }
}

/// Forwards events to an HTTP pub/sub relay as `{channel, name, data}`.
#[derive(Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookChannel {
    /// Creates a relay channel.
    ///
    /// # Arguments
    /// * `endpoint` - URL events are POSTed to
    /// * `timeout` - Bound on each relay request, connect included
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "channel": channel,
            "name": event,
            "data": payload,
        });
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Publishes to every inner channel; fails if any of them failed.
pub struct FanoutChannel {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl FanoutChannel {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl NotificationChannel for FanoutChannel {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), NotifyError> {
        let results = futures::future::join_all(
            self.channels
                .iter()
                .map(|inner| inner.publish(channel, event, payload.clone())),
        )
        .await;
        results.into_iter().collect()
    }
}

/// Sends completed verifications to the verifier's channel.
#[derive(Clone)]
pub struct NotificationPublisher {
    channel: Arc<dyn NotificationChannel>,
}

impl NotificationPublisher {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    pub async fn publish(&self, verifier: &AccountId, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let data = serde_json::to_value(payload)?;
        self.channel
            .publish(&verifier_channel(verifier), NEW_VERIFICATION_EVENT, data)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::identity_resolver::tests::account;
    use serde_json::json;

    /// Channel that remembers everything published to it, or fails.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        pub published: Mutex<Vec<ChannelMessage>>,
        pub fail: bool,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Unavailable("relay offline".into()));
            }
            self.published.lock().unwrap().push(ChannelMessage {
                channel: channel.into(),
                event: event.into(),
                data: payload,
            });
            Ok(())
        }
    }

    #[test]
    fn test_verifier_channel_name() {
        assert_eq!(
            verifier_channel(&account('a')),
            "verifier-0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[tokio::test]
    async fn test_hub_delivers_to_subscribers() {
        let hub = BroadcastHub::new(8);
        let mut first = hub.subscribe("verifier-x").unwrap();
        let mut second = hub.subscribe("verifier-x").unwrap();
        let mut other = hub.subscribe("verifier-y").unwrap();
        assert_eq!(hub.subscriber_count("verifier-x"), 2);

        hub.publish("verifier-x", NEW_VERIFICATION_EVENT, json!({"success": true}))
            .await
            .unwrap();

        for rx in [&mut first, &mut second] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.event, NEW_VERIFICATION_EVENT);
            assert_eq!(message.data, json!({"success": true}));
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hub_publish_without_subscribers_is_ok() {
        let hub = BroadcastHub::new(8);
        tokio_test::assert_ok!(hub.publish("verifier-nobody", NEW_VERIFICATION_EVENT, json!({})).await);
        assert_eq!(hub.subscriber_count("verifier-nobody"), 0);
    }

    #[tokio::test]
    async fn test_webhook_gives_up_on_hung_relay() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                held.push(socket);
            }
        });

        let webhook = WebhookChannel::new(format!("http://{}/events", addr), Duration::from_millis(200)).unwrap();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            webhook.publish("verifier-x", NEW_VERIFICATION_EVENT, json!({})),
        )
        .await
        .expect("relay request should be bounded by the client timeout");

        assert!(matches!(outcome, Err(NotifyError::Transport(e)) if e.is_timeout()));
        relay.abort();
    }

    #[tokio::test]
    async fn test_fanout_reports_any_failure() {
        let healthy = Arc::new(RecordingChannel::default());
        let broken = Arc::new(RecordingChannel { fail: true, ..Default::default() });
        let fanout = FanoutChannel::new(vec![healthy.clone() as Arc<dyn NotificationChannel>, broken]);

        tokio_test::assert_err!(fanout.publish("verifier-x", NEW_VERIFICATION_EVENT, json!({})).await);
        assert_eq!(healthy.published.lock().unwrap().len(), 1);
    }
}
