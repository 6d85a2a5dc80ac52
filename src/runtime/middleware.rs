//! Middleware chain applied around every publication and reception.
//!
//! A chain runs in registration order on the way in and unwinds in reverse on
//! the way out. The transport action (actual publish or handler dispatch) is
//! the innermost step: mutations made before calling `next` are visible to
//! later middlewares and to the transport, mutations made after `next`
//! returns are visible only on the return path.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BrokerError, BrokerMessage};

/// Direction of the operation a middleware wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Publication,
    Reception,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Publication => write!(f, "publication"),
            Direction::Reception => write!(f, "reception"),
        }
    }
}

/// Context handed to every middleware invocation.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub direction: Direction,
    pub channel: String,
}

impl MiddlewareContext {
    pub fn new(direction: Direction, channel: impl Into<String>) -> Self {
        Self {
            direction,
            channel: channel.into(),
        }
    }
}

/// The transport action at the end of a chain. It receives the envelope as
/// mutated by every middleware's pre-`next` phase.
pub type Terminal =
    Box<dyn FnOnce(BrokerMessage) -> BoxFuture<'static, Result<(), BrokerError>> + Send>;

/// An interceptor around message transmission and delivery.
///
/// Returning an error without calling `next` aborts the operation; the
/// envelope is neither transmitted nor delivered.
pub trait Middleware: Send + Sync {
    fn handle<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        message: &'a mut BrokerMessage,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;
}

/// The remaining chain, ending at the transport action.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    terminal: Terminal,
}

impl<'a> Next<'a> {
    /// Invoke the rest of the chain.
    pub async fn run(
        self,
        ctx: &MiddlewareContext,
        message: &mut BrokerMessage,
    ) -> Result<(), BrokerError> {
        match self.rest.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        ctx,
                        message,
                        Next {
                            rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => (self.terminal)(message.clone()).await,
        }
    }
}

/// Run `message` through `middlewares`, ending at `terminal`.
pub async fn execute(
    ctx: &MiddlewareContext,
    middlewares: &[Arc<dyn Middleware>],
    message: &mut BrokerMessage,
    terminal: Terminal,
) -> Result<(), BrokerError> {
    Next {
        rest: middlewares,
        terminal,
    }
    .run(ctx, message)
    .await
}

/// Logs every publication and reception.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logging;

impl Middleware for Logging {
    fn handle<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        message: &'a mut BrokerMessage,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            debug!(
                channel = %ctx.channel,
                direction = %ctx.direction,
                payload_size = message.payload.len(),
                "Message passing through middleware chain"
            );
            let result = next.run(ctx, message).await;
            if let Err(ref error) = result {
                warn!(
                    channel = %ctx.channel,
                    direction = %ctx.direction,
                    error = %error,
                    "Operation failed"
                );
            }
            result
        })
    }
}

/// Forwards a copy of every envelope to a channel.
///
/// Lets tests and monitors observe wire traffic without altering it.
pub struct Interceptor {
    tx: mpsc::Sender<BrokerMessage>,
}

impl Interceptor {
    pub fn new(tx: mpsc::Sender<BrokerMessage>) -> Self {
        Self { tx }
    }
}

impl Middleware for Interceptor {
    fn handle<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        message: &'a mut BrokerMessage,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let _ = self.tx.send(message.clone()).await;
            next.run(ctx, message).await
        })
    }
}
