//! Pub/sub client: a non-blocking drainable queue of typed notifications fed
//! by a PubNub HTTP long-poll task. Tests feed the queue directly; the
//! `mock-subscribe-key` sentinel yields an inert client.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dendro_compute_core::types::PubsubSubscription;

/// Subscribe key sentinel that disables the real transport.
pub const MOCK_SUBSCRIBE_KEY: &str = "mock-subscribe-key";

const PUBNUB_ORIGIN: &str = "https://ps.pndsn.com";
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// What a pub/sub message means to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubsubMessageKind {
    /// A new job may be waiting (`newPendingJob`).
    NewPendingJob,
    /// A job's status changed. The wire spelling is `jobStatusChaged`; the
    /// corrected `jobStatusChanged` is accepted as an alias, and neither is
    /// ever emitted by the daemon.
    JobStatusChanged,
    /// Any other message type; drained and ignored.
    Other,
}

/// A drained pub/sub message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubsubMessage {
    /// How the daemon interprets the message.
    pub kind: PubsubMessageKind,
}

impl PubsubMessage {
    /// Wraps a kind in a message.
    pub fn new(kind: PubsubMessageKind) -> Self {
        Self { kind }
    }

    fn from_payload(payload: &serde_json::Value) -> Self {
        let kind = match payload.get("type").and_then(|v| v.as_str()) {
            Some("newPendingJob") => PubsubMessageKind::NewPendingJob,
            Some("jobStatusChaged") | Some("jobStatusChanged") => {
                PubsubMessageKind::JobStatusChanged
            }
            _ => PubsubMessageKind::Other,
        };
        Self { kind }
    }
}

#[derive(Debug, Deserialize)]
struct SubscribeCursor {
    #[serde(rename = "t")]
    timetoken: String,
}

#[derive(Debug, Deserialize)]
struct SubscribeEnvelope {
    #[serde(rename = "d")]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SubscribeResponse {
    #[serde(rename = "t")]
    cursor: SubscribeCursor,
    #[serde(rename = "m", default)]
    messages: Vec<SubscribeEnvelope>,
}

/// Buffered pub/sub receiver with a non-blocking drain.
#[derive(Debug)]
pub struct PubsubClient {
    rx: Option<mpsc::UnboundedReceiver<PubsubMessage>>,
}

impl PubsubClient {
    /// An inert client that never yields messages.
    pub fn disabled() -> Self {
        Self { rx: None }
    }

    /// A client fed by the returned sender; used by tests.
    pub fn channel() -> (mpsc::UnboundedSender<PubsubMessage>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Some(rx) })
    }

    /// Subscribes to the channel in `subscription` and spawns the long-poll
    /// transport task. The task retries transport errors forever and stops
    /// when the client is dropped.
    pub fn connect(http: reqwest::Client, subscription: PubsubSubscription) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(subscribe_loop(http, subscription, tx));
        Self { rx: Some(rx) }
    }

    /// Returns every message received since the last drain, oldest first.
    /// Never blocks.
    pub fn drain(&mut self) -> Vec<PubsubMessage> {
        let Some(rx) = self.rx.as_mut() else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }
}

async fn subscribe_loop(
    http: reqwest::Client,
    subscription: PubsubSubscription,
    tx: mpsc::UnboundedSender<PubsubMessage>,
) {
    let url = format!(
        "{PUBNUB_ORIGIN}/v2/subscribe/{}/{}/0",
        subscription.pubnub_subscribe_key, subscription.pubnub_channel
    );
    let mut timetoken = "0".to_string();
    loop {
        if tx.is_closed() {
            return;
        }
        let res = http
            .get(&url)
            .query(&[
                ("uuid", subscription.pubnub_user.as_str()),
                ("tt", timetoken.as_str()),
            ])
            .send()
            .await;
        let body = match res {
            Ok(res) if res.status().is_success() => res.json::<SubscribeResponse>().await,
            Ok(res) => {
                warn!("pubsub subscribe returned http {}", res.status());
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            Err(err) => {
                // Long-poll timeouts land here too; retrying with the same
                // timetoken loses nothing.
                debug!("pubsub subscribe request failed: {err:#}");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };
        match body {
            Ok(body) => {
                timetoken = body.cursor.timetoken;
                for envelope in body.messages {
                    if tx
                        .send(PubsubMessage::from_payload(&envelope.payload))
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Err(err) => {
                warn!("pubsub subscribe response was malformed: {err:#}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
