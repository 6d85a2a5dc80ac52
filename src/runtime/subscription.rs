//! Subscription handle between a broker driver and a subscriber.
//!
//! A subscription is a bounded FIFO queue fed by the driver plus a single
//! cancellation broadcast. The queue blocks on overflow instead of dropping,
//! so per-channel delivery order is preserved end to end.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::BrokerMessage;

/// Minimum queue depth drivers must provide per subscription.
pub const MESSAGES_QUEUE_SIZE: usize = 64;

/// Subscriber-side handle: a finite sequence of envelopes ended by
/// cancellation.
pub struct Subscription {
    receiver: mpsc::Receiver<BrokerMessage>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

/// Driver-side handle used to feed a subscription queue.
#[derive(Clone)]
pub struct SubscriptionTransmitter {
    sender: mpsc::Sender<BrokerMessage>,
    cancel_rx: watch::Receiver<bool>,
}

/// Detached handle that can cancel a subscription it does not own.
#[derive(Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl Subscription {
    /// Create a subscription with the default queue depth.
    pub fn channel() -> (SubscriptionTransmitter, Subscription) {
        Self::with_queue_size(MESSAGES_QUEUE_SIZE)
    }

    /// Create a subscription with an explicit queue depth.
    pub fn with_queue_size(depth: usize) -> (SubscriptionTransmitter, Subscription) {
        let (sender, receiver) = mpsc::channel(depth);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        (
            SubscriptionTransmitter {
                sender,
                cancel_rx: cancel_rx.clone(),
            },
            Subscription {
                receiver,
                cancel_tx,
                cancel_rx,
            },
        )
    }

    /// Next envelope, or `None` once the subscription is canceled and the
    /// queue is drained.
    pub async fn next(&mut self) -> Option<BrokerMessage> {
        if *self.cancel_rx.borrow() {
            return self.receiver.try_recv().ok();
        }
        let mut cancel = self.cancel_rx.clone();
        let received = tokio::select! {
            message = self.receiver.recv() => Some(message),
            _ = cancel.wait_for(|canceled| *canceled) => None,
        };
        match received {
            Some(message) => message,
            // Canceled while waiting: emit what is already queued, no more.
            None => self.receiver.try_recv().ok(),
        }
    }

    /// Stop delivery. Idempotent; already-queued envelopes still drain.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// True once `cancel` has been called.
    pub fn is_canceled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// A handle that cancels this subscription from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel_tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Run `teardown` once when the subscription is canceled.
    ///
    /// Dropping the subscription without canceling also triggers teardown.
    pub fn on_cancellation<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut cancel = self.cancel_rx.clone();
        tokio::spawn(async move {
            let _ = cancel.wait_for(|canceled| *canceled).await;
            teardown().await;
        });
    }
}

impl CancelHandle {
    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

impl SubscriptionTransmitter {
    /// Queue an envelope for the subscriber, blocking while the queue is
    /// full. Returns `false` once the subscription is canceled or gone.
    pub async fn transmit(&self, message: BrokerMessage) -> bool {
        if *self.cancel_rx.borrow() {
            return false;
        }
        tokio::select! {
            sent = self.sender.send(message) => sent.is_ok(),
            _ = self.canceled() => false,
        }
    }

    /// True once the subscription is canceled.
    pub fn is_canceled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Completes when the subscription is canceled or dropped.
    pub async fn canceled(&self) {
        let mut cancel = self.cancel_rx.clone();
        let _ = cancel.wait_for(|canceled| *canceled).await;
    }
}
