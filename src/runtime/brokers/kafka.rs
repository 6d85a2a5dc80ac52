//! Kafka broker driver.
//!
//! Topic = channel address, message value = payload, Kafka headers =
//! envelope headers. Publishing to a topic that does not exist yet requests
//! its creation and retries with backoff; anything else surfaces.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Message};
use tracing::warn;

use super::DEFAULT_QUEUE_GROUP_ID;
use crate::runtime::subscription::Subscription;
use crate::runtime::{BrokerController, BrokerError, BrokerMessage, Result};

/// Kafka driver built on `rdkafka`.
pub struct KafkaBroker {
    bootstrap_servers: String,
    group_id: String,
    producer: FutureProducer,
}

impl KafkaBroker {
    /// Create a driver for the given bootstrap hosts.
    pub fn new(hosts: Vec<String>) -> Result<Self> {
        let bootstrap_servers = hosts.join(",");
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self {
            bootstrap_servers,
            group_id: DEFAULT_QUEUE_GROUP_ID.to_string(),
            producer,
        })
    }

    /// Use a custom consumer group for subscriptions.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let new_topic = NewTopic::new(topic, 1, TopicReplication::Fixed(1));
        admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl BrokerController for KafkaBroker {
    async fn publish(&self, channel: &str, message: BrokerMessage) -> Result<()> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value),
            });
        }

        let mut delays = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(5)
            .build();
        loop {
            let record: FutureRecord<'_, (), Vec<u8>> = FutureRecord::to(channel)
                .payload(&message.payload)
                .headers(headers.clone());
            match self.producer.send(record, Duration::from_secs(5)).await {
                Ok(_) => return Ok(()),
                Err((e, _))
                    if e.rdkafka_error_code() == Some(RDKafkaErrorCode::UnknownTopicOrPartition) =>
                {
                    warn!(
                        topic = %channel,
                        "Topic does not exist yet; requesting creation and retrying"
                    );
                    self.create_topic(channel).await?;
                    match delays.next() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(BrokerError::Publish(e.to_string())),
                    }
                }
                Err((e, _)) => return Err(BrokerError::Publish(e.to_string())),
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        // Make sure the topic exists before attaching the consumer.
        self.create_topic(channel).await?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        consumer
            .subscribe(&[channel])
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let (transmitter, subscription) = Subscription::channel();
        let channel = channel.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = consumer.recv() => match received {
                        Ok(received) => {
                            let mut headers = HashMap::new();
                            if let Some(borrowed) = received.headers() {
                                for header in borrowed.iter() {
                                    if let Some(value) = header.value {
                                        headers.insert(header.key.to_string(), value.to_vec());
                                    }
                                }
                            }
                            let payload =
                                received.payload().map(<[u8]>::to_vec).unwrap_or_default();
                            let delivered = transmitter
                                .transmit(BrokerMessage { headers, payload })
                                .await;
                            if !delivered {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "Kafka receive failed");
                            break;
                        }
                    },
                    _ = transmitter.canceled() => break,
                }
            }
        });

        Ok(subscription)
    }

    async fn close(&self) {}
}
