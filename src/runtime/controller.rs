//! Controller glue generated code builds on.
//!
//! A controller owns its subscriptions and a reference to one broker driver.
//! Every publication and every reception runs through the middleware chain;
//! inbound envelopes matching a pending correlation registration are routed
//! to their waiter instead of the channel handler.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::error;

use super::correlation::{CorrelationLocator, CorrelationRegistrar, Waiter};
use super::middleware::{self, Direction, Middleware, MiddlewareContext};
use super::subscription::CancelHandle;
use super::{BrokerController, BrokerError, BrokerMessage, Result};

/// Raw envelope handler invoked after the inbound middleware chain.
pub type EnvelopeHandler =
    Arc<dyn Fn(BrokerMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wires a broker driver to a middleware chain.
pub struct Controller {
    broker: Arc<dyn BrokerController>,
    middlewares: Vec<Arc<dyn Middleware>>,
    registrar: CorrelationRegistrar,
    locators: HashMap<String, CorrelationLocator>,
    subscriptions: Mutex<HashMap<String, CancelHandle>>,
}

impl Controller {
    pub fn new(broker: Arc<dyn BrokerController>) -> Self {
        Self {
            broker,
            middlewares: Vec::new(),
            registrar: CorrelationRegistrar::new(),
            locators: HashMap::new(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Attach middlewares, applied in order outbound and unwound inbound.
    pub fn with_middlewares(mut self, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        self.middlewares = middlewares;
        self
    }

    /// Declare where the correlation id lives for envelopes on `channel`.
    pub fn with_correlation_locator(
        mut self,
        channel: impl Into<String>,
        locator: CorrelationLocator,
    ) -> Self {
        self.locators.insert(channel.into(), locator);
        self
    }

    /// Publish one envelope through the middleware chain.
    pub async fn publish(&self, channel: &str, mut message: BrokerMessage) -> Result<()> {
        let ctx = MiddlewareContext::new(Direction::Publication, channel);
        let broker = Arc::clone(&self.broker);
        let channel = channel.to_string();
        middleware::execute(
            &ctx,
            &self.middlewares,
            &mut message,
            Box::new(move |message: BrokerMessage| {
                Box::pin(async move { broker.publish(&channel, message).await })
            }),
        )
        .await
    }

    /// Subscribe to `channel`, dispatching every envelope through the chain
    /// to `handler`. Fails when the channel already has a subscription.
    pub async fn subscribe(&self, channel: &str, handler: EnvelopeHandler) -> Result<()> {
        self.subscribe_inner(channel, handler, false).await
    }

    async fn subscribe_inner(
        &self,
        channel: &str,
        handler: EnvelopeHandler,
        allow_existing: bool,
    ) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(channel) {
            if allow_existing {
                return Ok(());
            }
            return Err(BrokerError::Subscribe(format!(
                "already subscribed to channel '{channel}'"
            )));
        }
        let mut subscription = self.broker.subscribe(channel).await?;
        subscriptions.insert(channel.to_string(), subscription.cancel_handle());
        drop(subscriptions);

        let middlewares = self.middlewares.clone();
        let registrar = self.registrar.clone();
        let locator = self.locators.get(channel).cloned();
        let channel = channel.to_string();
        tokio::spawn(async move {
            while let Some(mut message) = subscription.next().await {
                let ctx = MiddlewareContext::new(Direction::Reception, channel.as_str());
                let handler = Arc::clone(&handler);
                let registrar = registrar.clone();
                let locator = locator.clone();
                let result = middleware::execute(
                    &ctx,
                    &middlewares,
                    &mut message,
                    Box::new(move |message: BrokerMessage| {
                        Box::pin(async move {
                            let message = match &locator {
                                Some(locator) => match registrar.resolve(locator, message) {
                                    Some(message) => message,
                                    // Consumed by a correlation waiter.
                                    None => return Ok(()),
                                },
                                None => message,
                            };
                            handler(message).await
                        })
                    }),
                )
                .await;
                // Handler errors surface through the chain but do not tear
                // down the subscription task.
                if let Err(e) = result {
                    error!(channel = %channel, error = %e, "Message handling failed");
                }
            }
        });
        Ok(())
    }

    /// Register interest in a correlated response on `channel`.
    ///
    /// Ensures a subscription on the response channel exists; envelopes that
    /// match no waiter fall through to the channel handler (a no-op when the
    /// subscription was created here).
    pub async fn wait_for(&self, channel: &str, id: &str) -> Result<Waiter> {
        if !self.locators.contains_key(channel) {
            return Err(BrokerError::Subscribe(format!(
                "channel '{channel}' declares no correlation id"
            )));
        }
        let waiter = self.registrar.register(id)?;
        self.subscribe_inner(
            channel,
            Arc::new(|_message: BrokerMessage| Box::pin(async { Ok(()) })),
            true,
        )
        .await?;
        Ok(waiter)
    }

    /// Cancel the subscription on one channel.
    pub async fn unsubscribe(&self, channel: &str) {
        if let Some(handle) = self.subscriptions.lock().await.remove(channel) {
            handle.cancel();
        }
    }

    /// Cancel every owned subscription. The broker itself is left open; it
    /// may be shared with other controllers.
    pub async fn close(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (_, handle) in subscriptions.drain() {
            handle.cancel();
        }
    }
}
