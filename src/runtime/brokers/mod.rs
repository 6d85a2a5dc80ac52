//! Broker drivers.
//!
//! Every driver satisfies [`BrokerController`](super::BrokerController) and
//! moves opaque envelopes; nothing here knows about generated types.

pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "nats")]
pub mod nats;

use std::sync::Arc;

use super::{BrokerController, BrokerError};

pub use channel::ChannelBroker;
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
#[cfg(feature = "nats")]
pub use nats::NatsBroker;

/// Queue group shared by horizontally-scaled subscribers.
///
/// NATS queue subscriptions and Kafka consumer groups use this id unless the
/// driver is configured otherwise, so replicas of one application
/// load-balance instead of each receiving every message.
pub const DEFAULT_QUEUE_GROUP_ID: &str = "asyncapi";

/// Create a driver from a runtime-selected key.
///
/// Known keys: `channel`, `nats` (feature `nats`), `kafka` (feature `kafka`).
/// Anything else is `InvalidBroker`.
pub async fn from_key(key: &str, url: &str) -> Result<Arc<dyn BrokerController>, BrokerError> {
    match key {
        "channel" => Ok(Arc::new(ChannelBroker::new())),
        #[cfg(feature = "nats")]
        "nats" => Ok(Arc::new(NatsBroker::connect(url).await?)),
        #[cfg(feature = "kafka")]
        "kafka" => Ok(Arc::new(KafkaBroker::new(
            url.split(',').map(str::to_string).collect(),
        )?)),
        other => {
            let _ = url;
            Err(BrokerError::InvalidBroker(other.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_key_is_invalid_broker() {
        let result = from_key("carrier-pigeon", "").await;
        assert!(matches!(result, Err(BrokerError::InvalidBroker(_))));
    }

    #[tokio::test]
    async fn test_channel_key_resolves() {
        assert!(from_key("channel", "").await.is_ok());
    }
}
