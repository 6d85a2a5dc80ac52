//! Broker-agnostic runtime for generated clients.
//!
//! Generated controllers link against this module:
//! - `BrokerController` trait: the driver contract (publish/subscribe/close)
//! - `BrokerMessage`: the neutral `{headers, payload}` envelope
//! - `Middleware` chain applied around every publication and reception
//! - `Subscription` with a bounded queue and cancellation semantics
//! - `CorrelationRegistrar`: request/response over a pub/sub substrate
//! - `VersionWrapper`: several schema versions sharing one broker

pub mod brokers;
pub mod controller;
pub mod correlation;
pub mod middleware;
pub mod subscription;
pub mod versioning;

use std::collections::HashMap;

use async_trait::async_trait;

pub use controller::{Controller, EnvelopeHandler};
pub use correlation::{CorrelatedMessage, CorrelationLocator, CorrelationRegistrar, Waiter};
pub use middleware::{Direction, Interceptor, Logging, Middleware, MiddlewareContext, Next};
pub use subscription::{CancelHandle, Subscription, SubscriptionTransmitter};
pub use versioning::{VersionWrapper, VERSION_HEADER};

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by the runtime to generated code and drivers.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("broker is closed")]
    Closed,

    #[error("invalid broker '{0}'")]
    InvalidBroker(String),

    #[error("correlation id '{0}' is already registered")]
    DuplicateCorrelation(String),

    #[error("operation canceled")]
    Canceled,

    #[error("failed to unmarshal message: {0}")]
    Unmarshal(String),

    #[error("handler failed: {0}")]
    Handler(String),
}

/// Broker-neutral message envelope.
///
/// Header keys are case-sensitive. The payload is whatever marshaled form the
/// emitter chose (JSON by default); drivers treat both as opaque bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerMessage {
    pub headers: HashMap<String, Vec<u8>>,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Envelope with a payload and no headers.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            headers: HashMap::new(),
            payload,
        }
    }

    /// Header value as UTF-8, when present and valid.
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Set a header value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.headers.insert(key.into(), value.into());
    }
}

/// Contract every broker driver satisfies.
///
/// Drivers are type-agnostic: they move opaque envelopes. Delivery order per
/// channel per subscriber follows broker order; nothing is promised across
/// channels. `publish` and `subscribe` must be safe to call concurrently.
#[async_trait]
pub trait BrokerController: Send + Sync {
    /// Deliver a single envelope to `channel`.
    ///
    /// Implementations may retry transient conditions (e.g. topic
    /// autocreation) but must surface permanent failures.
    async fn publish(&self, channel: &str, message: BrokerMessage) -> Result<()>;

    /// Begin delivery from `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Release driver-wide resources.
    async fn close(&self);
}
