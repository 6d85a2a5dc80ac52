//! NATS broker driver.
//!
//! Subject = channel address, payload = envelope bytes, headers = NATS
//! headers. Subscriptions join a queue group so replicas load-balance.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use super::DEFAULT_QUEUE_GROUP_ID;
use crate::runtime::subscription::Subscription;
use crate::runtime::{BrokerController, BrokerError, BrokerMessage, Result};

/// NATS driver built on `async-nats`.
pub struct NatsBroker {
    client: async_nats::Client,
    queue_group: String,
}

impl NatsBroker {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Wrap an already-connected client.
    pub fn with_client(client: async_nats::Client) -> Self {
        Self {
            client,
            queue_group: DEFAULT_QUEUE_GROUP_ID.to_string(),
        }
    }

    /// Use a custom queue group for subscriptions.
    pub fn with_queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = group.into();
        self
    }
}

#[async_trait]
impl BrokerController for NatsBroker {
    async fn publish(&self, channel: &str, message: BrokerMessage) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        for (key, value) in &message.headers {
            headers.insert(key.as_str(), String::from_utf8_lossy(value).as_ref());
        }
        self.client
            .publish_with_headers(channel.to_string(), headers, message.payload.into())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut subscriber = self
            .client
            .queue_subscribe(channel.to_string(), self.queue_group.clone())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let (transmitter, subscription) = Subscription::channel();
        let channel = channel.to_string();

        // Feed the subscription queue until the server stream ends or the
        // subscription is canceled, then drop the server-side interest.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = subscriber.next() => {
                        let Some(received) = received else { break };
                        let mut headers = HashMap::new();
                        if let Some(map) = received.headers {
                            for (name, values) in map.iter() {
                                if let Some(value) = values.iter().next() {
                                    headers.insert(
                                        name.to_string(),
                                        value.to_string().into_bytes(),
                                    );
                                }
                            }
                        }
                        let delivered = transmitter
                            .transmit(BrokerMessage {
                                headers,
                                payload: received.payload.to_vec(),
                            })
                            .await;
                        if !delivered {
                            break;
                        }
                    }
                    _ = transmitter.canceled() => break,
                }
            }
            if let Err(e) = subscriber.unsubscribe().await {
                warn!(channel = %channel, error = %e, "NATS unsubscribe failed");
            }
        });

        Ok(subscription)
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "NATS flush on close failed");
        }
    }
}
