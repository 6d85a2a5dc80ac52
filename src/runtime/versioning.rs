//! Versioning wrapper: several schema versions sharing one broker.
//!
//! The wrapper keeps at most one real subscription per channel and
//! demultiplexes inbound envelopes on the `version` header to the matching
//! per-version subscriber. Outbound envelopes are stamped with the
//! publisher's declared version.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::warn;

use super::subscription::{CancelHandle, Subscription, SubscriptionTransmitter};
use super::{BrokerController, BrokerError, BrokerMessage, Result};

/// Header stamped on outbound envelopes and used to route inbound ones.
pub const VERSION_HEADER: &str = "version";

struct ChannelDemux {
    /// Driver-side feeds, one per registered version.
    versions: HashMap<String, SubscriptionTransmitter>,
    /// Cancels the single underlying subscription when the last version
    /// unsubscribes.
    underlying: CancelHandle,
}

type DemuxTable = Arc<Mutex<HashMap<String, ChannelDemux>>>;

fn lock_table(table: &DemuxTable) -> MutexGuard<'_, HashMap<String, ChannelDemux>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wraps a broker so that controllers speaking different schema versions can
/// share it. Obtain per-version broker views with [`VersionWrapper::for_version`].
pub struct VersionWrapper {
    broker: Arc<dyn BrokerController>,
    channels: DemuxTable,
}

impl VersionWrapper {
    pub fn new(broker: Arc<dyn BrokerController>) -> Self {
        Self {
            broker,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A broker view that stamps and filters on `version`.
    pub fn for_version(&self, version: &str) -> Arc<dyn BrokerController> {
        Arc::new(VersionedBroker {
            version: version.to_string(),
            broker: Arc::clone(&self.broker),
            channels: Arc::clone(&self.channels),
        })
    }
}

struct VersionedBroker {
    version: String,
    broker: Arc<dyn BrokerController>,
    channels: DemuxTable,
}

impl VersionedBroker {
    /// Register this version on an existing demux. Returns `None` when the
    /// channel has no demux yet.
    fn try_join(&self, channel: &str) -> Option<Result<Subscription>> {
        let mut channels = lock_table(&self.channels);
        let demux = channels.get_mut(channel)?;
        if demux.versions.contains_key(&self.version) {
            return Some(Err(BrokerError::Subscribe(format!(
                "version '{}' is already subscribed on channel '{}'",
                self.version, channel
            ))));
        }
        let (transmitter, subscription) = Subscription::channel();
        demux.versions.insert(self.version.clone(), transmitter);

        let table = Arc::clone(&self.channels);
        let channel = channel.to_string();
        let version = self.version.clone();
        subscription.on_cancellation(move || async move {
            let mut channels = lock_table(&table);
            if let Some(demux) = channels.get_mut(&channel) {
                demux.versions.remove(&version);
                if demux.versions.is_empty() {
                    demux.underlying.cancel();
                    channels.remove(&channel);
                }
            }
        });
        Some(Ok(subscription))
    }
}

#[async_trait]
impl BrokerController for VersionedBroker {
    async fn publish(&self, channel: &str, mut message: BrokerMessage) -> Result<()> {
        message.set_header(VERSION_HEADER, self.version.as_bytes().to_vec());
        self.broker.publish(channel, message).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        loop {
            if let Some(result) = self.try_join(channel) {
                return result;
            }

            // No demux for this channel yet: create the single underlying
            // subscription, then retry joining it.
            let mut underlying = self.broker.subscribe(channel).await?;
            {
                let mut channels = lock_table(&self.channels);
                if channels.contains_key(channel) {
                    // Another version raced us; discard our subscription.
                    underlying.cancel();
                    continue;
                }
                channels.insert(
                    channel.to_string(),
                    ChannelDemux {
                        versions: HashMap::new(),
                        underlying: underlying.cancel_handle(),
                    },
                );
            }

            let table = Arc::clone(&self.channels);
            let channel_name = channel.to_string();
            tokio::spawn(async move {
                while let Some(message) = underlying.next().await {
                    let Some(version) = message.header_str(VERSION_HEADER).map(str::to_string)
                    else {
                        warn!(
                            channel = %channel_name,
                            "Dropping message without version header"
                        );
                        continue;
                    };
                    let transmitter = {
                        let channels = lock_table(&table);
                        channels
                            .get(&channel_name)
                            .and_then(|demux| demux.versions.get(&version))
                            .cloned()
                    };
                    match transmitter {
                        Some(transmitter) => {
                            transmitter.transmit(message).await;
                        }
                        None => {
                            warn!(
                                channel = %channel_name,
                                version = %version,
                                "Dropping message for unregistered version"
                            );
                        }
                    }
                }
            });
        }
    }

    async fn close(&self) {
        {
            let mut channels = lock_table(&self.channels);
            for (_, demux) in channels.drain() {
                demux.underlying.cancel();
            }
        }
        self.broker.close().await;
    }
}
