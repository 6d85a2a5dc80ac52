//! In-memory broker driver.
//!
//! Single-process pub/sub over per-subscription bounded queues, in place of
//! an external broker. Every subscriber on a channel receives every message,
//! in publication order; a full queue blocks the publisher rather than drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::runtime::subscription::{Subscription, SubscriptionTransmitter};
use crate::runtime::{BrokerController, BrokerError, BrokerMessage, Result};

type ChannelTable = Arc<Mutex<HashMap<String, Vec<SubscriptionTransmitter>>>>;

/// In-memory driver for tests and standalone runs.
#[derive(Default)]
pub struct ChannelBroker {
    channels: ChannelTable,
    closed: AtomicBool,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<SubscriptionTransmitter>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BrokerController for ChannelBroker {
    async fn publish(&self, channel: &str, message: BrokerMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let transmitters: Vec<SubscriptionTransmitter> = {
            let mut channels = self.lock();
            let Some(subscribers) = channels.get_mut(channel) else {
                // No subscribers is not an error for a pub/sub broker.
                return Ok(());
            };
            subscribers.retain(|t| !t.is_canceled());
            subscribers.clone()
        };
        for transmitter in transmitters {
            transmitter.transmit(message.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let (transmitter, subscription) = Subscription::channel();
        self.lock()
            .entry(channel.to_string())
            .or_default()
            .push(transmitter);
        debug!(channel = %channel, "In-memory subscription created");
        Ok(subscription)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the transmitters ends every subscription after it drains.
        self.lock().clear();
    }
}
