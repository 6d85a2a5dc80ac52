//! Correlation registrar: request/response over a pub/sub substrate.
//!
//! A requester registers the correlation id it chose, publishes the request,
//! and awaits the waiter. When a response carrying the same id arrives on the
//! response channel, the registrar hands it to the waiter instead of normal
//! subscription delivery. Dropping a waiter (e.g. on timeout) removes its
//! registration eagerly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use super::{BrokerError, BrokerMessage};

/// A typed message carrying a correlation id.
///
/// Generated message types implement this when their specification declares
/// a correlation id, so `wait_for_*` methods can accept any request type.
pub trait CorrelatedMessage {
    /// The correlation id, when set on this message.
    fn correlation_id(&self) -> Option<String>;
}

/// Where the specification locates the correlation id inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationLocator {
    /// Carried as a header. The key is the final segment of the declared
    /// location path.
    Header { key: String },
    /// Carried inside the JSON payload at the given path.
    Payload { path: Vec<String> },
}

impl CorrelationLocator {
    /// Locator for a header-carried correlation id.
    pub fn header(key: impl Into<String>) -> Self {
        Self::Header { key: key.into() }
    }

    /// Locator for a payload-carried correlation id.
    pub fn payload(path: Vec<String>) -> Self {
        Self::Payload { path }
    }

    /// Parse a runtime expression such as `$message.header#/correlationId`
    /// or `$message.payload#/meta/id`.
    pub fn parse(location: &str) -> Option<Self> {
        let (root, fragment) = location.split_once("#/")?;
        let path: Vec<String> = fragment.split('/').map(str::to_string).collect();
        match root {
            "$message.header" => Some(Self::Header {
                key: path.last()?.clone(),
            }),
            "$message.payload" => Some(Self::Payload { path }),
            _ => None,
        }
    }

    /// Extract the correlation id from an envelope.
    pub fn extract(&self, message: &BrokerMessage) -> Option<String> {
        match self {
            Self::Header { key } => message.header_str(key).map(str::to_string),
            Self::Payload { path } => {
                let value: serde_json::Value = serde_json::from_slice(&message.payload).ok()?;
                let mut node = &value;
                for segment in path {
                    node = node.get(segment)?;
                }
                node.as_str().map(str::to_string)
            }
        }
    }
}

type WaiterMap = Arc<Mutex<HashMap<String, oneshot::Sender<BrokerMessage>>>>;

/// Pending request registrations keyed by correlation id.
///
/// Safe for concurrent register/resolve/cancel; resolution is atomic with
/// respect to registration of the same id (one map lock guards both).
#[derive(Clone, Default)]
pub struct CorrelationRegistrar {
    waiters: WaiterMap,
}

impl CorrelationRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<BrokerMessage>>> {
        self.waiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a pending request. Fails when `id` is already registered.
    pub fn register(&self, id: &str) -> Result<Waiter, BrokerError> {
        let mut waiters = self.lock();
        if waiters.contains_key(id) {
            return Err(BrokerError::DuplicateCorrelation(id.to_string()));
        }
        let (sender, receiver) = oneshot::channel();
        waiters.insert(id.to_string(), sender);
        Ok(Waiter {
            id: id.to_string(),
            waiters: Arc::clone(&self.waiters),
            receiver,
        })
    }

    /// Hand an inbound envelope to a matching waiter.
    ///
    /// Returns the envelope back when it carries no id or no waiter matched,
    /// so it can continue into normal subscription delivery.
    pub fn resolve(
        &self,
        locator: &CorrelationLocator,
        message: BrokerMessage,
    ) -> Option<BrokerMessage> {
        let Some(id) = locator.extract(&message) else {
            return Some(message);
        };
        let sender = self.lock().remove(&id);
        match sender {
            Some(sender) => match sender.send(message) {
                Ok(()) => None,
                // The waiter was dropped concurrently.
                Err(message) => Some(message),
            },
            None => Some(message),
        }
    }

    /// Remove a registration, waking its waiter with `Canceled`.
    pub fn cancel(&self, id: &str) {
        self.lock().remove(id);
    }
}

/// A pending response. Dropping it removes the registration.
pub struct Waiter {
    id: String,
    waiters: WaiterMap,
    receiver: oneshot::Receiver<BrokerMessage>,
}

impl Waiter {
    /// The correlation id this waiter is registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Await the correlated response envelope.
    pub async fn wait(mut self) -> Result<BrokerMessage, BrokerError> {
        match (&mut self.receiver).await {
            Ok(message) => Ok(message),
            Err(_) => Err(BrokerError::Canceled),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut waiters = self
            .waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        waiters.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_with_header(key: &str, id: &str) -> BrokerMessage {
        let mut message = BrokerMessage::new(b"{}".to_vec());
        message.set_header(key, id.as_bytes().to_vec());
        message
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            CorrelationLocator::parse("$message.header#/correlationId"),
            Some(CorrelationLocator::header("correlationId"))
        );
        assert_eq!(
            CorrelationLocator::parse("$message.header#/meta/id"),
            Some(CorrelationLocator::header("id"))
        );
        assert_eq!(
            CorrelationLocator::parse("$message.payload#/meta/id"),
            Some(CorrelationLocator::payload(vec![
                "meta".to_string(),
                "id".to_string()
            ]))
        );
        assert_eq!(CorrelationLocator::parse("$message.body#/id"), None);
    }

    #[test]
    fn test_extract_from_payload() {
        let locator = CorrelationLocator::payload(vec!["meta".to_string(), "id".to_string()]);
        let message = BrokerMessage::new(br#"{"meta":{"id":"abc"}}"#.to_vec());
        assert_eq!(locator.extract(&message), Some("abc".to_string()));

        let message = BrokerMessage::new(br#"{"meta":{}}"#.to_vec());
        assert_eq!(locator.extract(&message), None);
    }

    #[tokio::test]
    async fn test_register_resolve_roundtrip() {
        let registrar = CorrelationRegistrar::new();
        let locator = CorrelationLocator::header("correlationId");

        let waiter = registrar.register("id-1").expect("registration");
        let resolved = registrar.resolve(&locator, envelope_with_header("correlationId", "id-1"));
        assert!(resolved.is_none(), "envelope should be consumed");

        let message = waiter.wait().await.expect("response");
        assert_eq!(message.header_str("correlationId"), Some("id-1"));
    }

    #[tokio::test]
    async fn test_unmatched_envelope_passes_through() {
        let registrar = CorrelationRegistrar::new();
        let locator = CorrelationLocator::header("correlationId");

        let _waiter = registrar.register("id-1").expect("registration");
        let other = envelope_with_header("correlationId", "id-2");
        assert!(registrar.resolve(&locator, other).is_some());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registrar = CorrelationRegistrar::new();
        let _waiter = registrar.register("id-1").expect("registration");
        assert!(matches!(
            registrar.register("id-1"),
            Err(BrokerError::DuplicateCorrelation(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let registrar = CorrelationRegistrar::new();
        let waiter = registrar.register("id-1").expect("registration");
        registrar.cancel("id-1");
        assert!(matches!(waiter.wait().await, Err(BrokerError::Canceled)));
    }

    #[test]
    fn test_dropping_waiter_removes_entry() {
        let registrar = CorrelationRegistrar::new();
        {
            let _waiter = registrar.register("id-1").expect("registration");
        }
        // The id can be registered again once the first waiter is gone.
        assert!(registrar.register("id-1").is_ok());
    }
}
