//! Runtime round-trips over the in-memory broker: controller glue,
//! middleware effects on the wire, handler failure isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::timeout;

use asyncapi_codegen::runtime::{
    brokers::ChannelBroker, BrokerError, BrokerMessage, Controller, Direction, Middleware,
    MiddlewareContext, Next,
};

/// Middleware that stamps an extra header on publications only.
struct AdditionalHeader;

impl Middleware for AdditionalHeader {
    fn handle<'a>(
        &'a self,
        ctx: &'a MiddlewareContext,
        message: &'a mut BrokerMessage,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            if ctx.direction == Direction::Publication {
                message.set_header("additional", b"some-info".to_vec());
            }
            next.run(ctx, message).await
        })
    }
}

fn capturing_handler(
    tx: mpsc::Sender<BrokerMessage>,
) -> Arc<dyn Fn(BrokerMessage) -> BoxFuture<'static, Result<(), BrokerError>> + Send + Sync> {
    Arc::new(move |message: BrokerMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(message)
                .await
                .map_err(|e| BrokerError::Handler(e.to_string()))
        })
    })
}

#[tokio::test]
async fn test_publish_subscribe_roundtrip() {
    let broker = Arc::new(ChannelBroker::new());
    let publisher = Controller::new(broker.clone());
    let subscriber = Controller::new(broker);

    let (tx, mut rx) = mpsc::channel(8);
    subscriber
        .subscribe("greetings", capturing_handler(tx))
        .await
        .expect("subscribe");

    publisher
        .publish("greetings", BrokerMessage::new(br#""hello""#.to_vec()))
        .await
        .expect("publish");

    let received = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout")
        .expect("channel open");
    assert_eq!(received.payload, br#""hello""#.to_vec());
}

#[tokio::test]
async fn test_middleware_header_survives_roundtrip() {
    let broker = Arc::new(ChannelBroker::new());
    let publisher =
        Controller::new(broker.clone()).with_middlewares(vec![Arc::new(AdditionalHeader)]);
    let subscriber = Controller::new(broker).with_middlewares(vec![Arc::new(AdditionalHeader)]);

    let (tx, mut rx) = mpsc::channel(8);
    subscriber
        .subscribe("greetings", capturing_handler(tx))
        .await
        .expect("subscribe");

    let sent = BrokerMessage::new(br#""hello""#.to_vec());
    publisher
        .publish("greetings", sent.clone())
        .await
        .expect("publish");

    let received = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout")
        .expect("channel open");

    // The publication-side middleware stamped the header; the reception-side
    // instance left it alone. The payload is untouched either way.
    assert_eq!(received.header_str("additional"), Some("some-info"));
    assert_eq!(received.payload, sent.payload);
}

#[tokio::test]
async fn test_delivery_order_is_preserved() {
    let broker = Arc::new(ChannelBroker::new());
    let publisher = Controller::new(broker.clone());
    let subscriber = Controller::new(broker);

    let (tx, mut rx) = mpsc::channel(64);
    subscriber
        .subscribe("ordered", capturing_handler(tx))
        .await
        .expect("subscribe");

    for i in 0..10u8 {
        publisher
            .publish("ordered", BrokerMessage::new(vec![i]))
            .await
            .expect("publish");
    }
    for i in 0..10u8 {
        let received = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("channel open");
        assert_eq!(received.payload, vec![i]);
    }
}

#[tokio::test]
async fn test_handler_error_does_not_end_subscription() {
    let broker = Arc::new(ChannelBroker::new());
    let publisher = Controller::new(broker.clone());
    let subscriber = Controller::new(broker);

    let attempts = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::channel(8);
    let handler_attempts = Arc::clone(&attempts);
    subscriber
        .subscribe(
            "flaky",
            Arc::new(move |message: BrokerMessage| {
                let tx = tx.clone();
                let attempts = Arc::clone(&handler_attempts);
                Box::pin(async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(BrokerError::Handler("first one fails".to_string()));
                    }
                    let _ = tx.send(message).await;
                    Ok(())
                })
            }),
        )
        .await
        .expect("subscribe");

    publisher
        .publish("flaky", BrokerMessage::new(vec![1]))
        .await
        .expect("publish");
    publisher
        .publish("flaky", BrokerMessage::new(vec![2]))
        .await
        .expect("publish");

    // The first message failed in the handler; the task kept going and the
    // second one arrived.
    let received = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout")
        .expect("channel open");
    assert_eq!(received.payload, vec![2]);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_double_subscribe_is_rejected() {
    let broker = Arc::new(ChannelBroker::new());
    let controller = Controller::new(broker);

    let (tx, _rx) = mpsc::channel(8);
    controller
        .subscribe("once", capturing_handler(tx.clone()))
        .await
        .expect("first subscribe");
    assert!(matches!(
        controller.subscribe("once", capturing_handler(tx)).await,
        Err(BrokerError::Subscribe(_))
    ));
}

#[tokio::test]
async fn test_close_stops_delivery() {
    let broker = Arc::new(ChannelBroker::new());
    let publisher = Controller::new(broker.clone());
    let subscriber = Controller::new(broker);

    let (tx, mut rx) = mpsc::channel(8);
    subscriber
        .subscribe("closing", capturing_handler(tx))
        .await
        .expect("subscribe");
    subscriber.close().await;

    // Give the subscription task a moment to observe cancellation.
    tokio::time::sleep(Duration::from_millis(20)).await;

    publisher
        .publish("closing", BrokerMessage::new(vec![1]))
        .await
        .expect("publish");

    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
}
