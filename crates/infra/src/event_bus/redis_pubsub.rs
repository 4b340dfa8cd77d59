//! Redis pub/sub-backed event bus (optional).
//!
//! Pub/sub is not durable: a subscriber that is offline misses messages.
//! Drained retries are still safe, since their queue entries reappear after
//! the visibility timeout.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use redis::Commands;
use tracing::{error, instrument, warn};

use uploader_events::{EventBus, EventEnvelope, Subscription};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RedisBusError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Redis pub/sub bus for JSON status envelopes.
#[derive(Debug, Clone)]
pub struct RedisPubSubEventBus {
    client: redis::Client,
    channel: String,
}

impl RedisPubSubEventBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

impl EventBus<EventEnvelope> for RedisPubSubEventBus {
    type Error = RedisBusError;

    #[instrument(skip(self, message), fields(channel = %self.channel, event_id = %message.event_id()), err)]
    fn publish(&self, message: EventEnvelope) -> Result<(), Self::Error> {
        let payload = message.to_json().map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let _: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        Ok(())
    }

    fn subscribe(&self) -> Subscription<EventEnvelope> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();

        let client = self.client.clone();
        let channel = self.channel.clone();

        let spawned = thread::Builder::new()
            .name(format!("pubsub-{channel}"))
            .spawn(move || {
                let mut conn = match client.get_connection_with_timeout(CONNECT_TIMEOUT) {
                    Ok(c) => c,
                    Err(e) => {
                        error!(%channel, error = %e, "pub/sub connection failed");
                        return;
                    }
                };

                let mut pubsub = conn.as_pubsub();
                if let Err(e) = pubsub.subscribe(&channel) {
                    error!(%channel, error = %e, "pub/sub subscribe failed");
                    return;
                }
                let _ = ready_tx.send(());

                loop {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(e) => {
                            error!(%channel, error = %e, "pub/sub connection lost");
                            return;
                        }
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(%channel, error = %e, "non-text pub/sub payload");
                            continue;
                        }
                    };

                    let envelope = match EventEnvelope::from_json(&payload) {
                        Ok(env) => env,
                        Err(e) => {
                            warn!(%channel, error = %e, "dropping undecodable envelope");
                            continue;
                        }
                    };

                    if tx.send(envelope).is_err() {
                        return;
                    }
                }
            });

        match spawned {
            // Wait until SUBSCRIBE is acknowledged so nothing published after
            // this call returns is missed.
            Ok(_) => {
                if ready_rx.recv_timeout(CONNECT_TIMEOUT).is_err() {
                    warn!(channel = %self.channel, "pub/sub subscription not confirmed");
                }
            }
            Err(e) => error!(channel = %self.channel, error = %e, "failed to spawn pub/sub thread"),
        }

        Subscription::new(rx)
    }
}
