use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::{Semaphore, oneshot};

use super::*;
use crate::broker::{BrokerClient, BrokerDelivery, Decision, MemoryBroker};
use crate::codec::{self, Envelope, LogRecord, Payload, TaggedPayload};
use crate::utils::Error;

fn test_delivery(body: &str) -> (DeliveryHandle, oneshot::Receiver<Decision>) {
    let (responder, rx) = oneshot::channel();
    let handle = DeliveryHandle::from_broker(BrokerDelivery {
        message_id: "m-1".to_string(),
        publish_time: Utc::now(),
        data: body.as_bytes().to_vec(),
        attributes: HashMap::from([("origin".to_string(), "test".to_string())]),
        responder,
    });
    (handle, rx)
}

fn log_payload(mensagem: &str) -> Payload {
    Payload::Tagged(TaggedPayload::Log(LogRecord {
        level: Some("INFO".to_string()),
        mensagem: Some(mensagem.to_string()),
        ..Default::default()
    }))
}

async fn wait_for_count(counter: &AtomicUsize, expect: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == expect {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(counter.load(Ordering::SeqCst), expect, "timed out waiting");
}

/// Counts invocations and accepts everything.
struct CountingHandler {
    seen: Arc<AtomicUsize>,
}

impl MessageHandler for CountingHandler {
    fn handle(&self, delivery: DeliveryHandle) -> BoxFuture<'static, ()> {
        let seen = Arc::clone(&self.seen);
        Box::pin(async move {
            seen.fetch_add(1, Ordering::SeqCst);
            delivery.accept();
        })
    }
}

/// Blocks each invocation on a gate so in-flight concurrency is observable.
struct GatedHandler {
    entered: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
}

impl MessageHandler for GatedHandler {
    fn handle(&self, delivery: DeliveryHandle) -> BoxFuture<'static, ()> {
        let entered = Arc::clone(&self.entered);
        let gate = Arc::clone(&self.gate);
        Box::pin(async move {
            entered.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            delivery.accept();
        })
    }
}

#[derive(Default)]
struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

#[tokio::test]
async fn test_accept_records_and_signals_once() {
    let (handle, rx) = test_delivery(r#"{"tipo":"log","level":"INFO"}"#);
    assert_eq!(handle.decision(), DeliveryDecision::Pending);

    handle.accept();
    handle.accept();

    assert_eq!(handle.decision(), DeliveryDecision::Acked);
    assert_eq!(rx.await.unwrap(), Decision::Ack);
}

#[tokio::test]
async fn test_reject_after_accept_is_a_no_op() {
    let (handle, rx) = test_delivery("{}");
    handle.accept();
    handle.reject();

    assert_eq!(handle.decision(), DeliveryDecision::Acked);
    assert_eq!(rx.await.unwrap(), Decision::Ack);
}

#[tokio::test]
async fn test_accept_after_reject_is_a_no_op() {
    let (handle, rx) = test_delivery("{}");
    handle.reject();
    handle.accept();

    assert_eq!(handle.decision(), DeliveryDecision::Nacked);
    assert_eq!(rx.await.unwrap(), Decision::Nack);
}

#[tokio::test]
async fn test_concurrent_resolutions_pick_one_winner() {
    let (handle, rx) = test_delivery("{}");
    let handle = Arc::new(handle);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let handle = Arc::clone(&handle);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                handle.accept();
            } else {
                handle.reject();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let recorded = handle.decision();
    let signaled = rx.await.unwrap();
    match recorded {
        DeliveryDecision::Acked => assert_eq!(signaled, Decision::Ack),
        DeliveryDecision::Nacked => assert_eq!(signaled, Decision::Nack),
        DeliveryDecision::Pending => panic!("no decision recorded"),
    }
}

#[tokio::test]
async fn test_handle_exposes_message_metadata() {
    let body = r#"{"tipo":"log","level":"INFO"}"#;
    let (handle, _rx) = test_delivery(body);

    assert_eq!(handle.id(), "m-1");
    assert_eq!(handle.size_bytes(), body.len());
    assert_eq!(handle.data(), body.as_bytes());
    assert_eq!(handle.attributes()["origin"], "test");
    assert_eq!(handle.decode_payload().unwrap().tipo(), Some("log"));
}

#[tokio::test]
async fn test_dropping_pending_handle_leaves_it_unresolved() {
    let (handle, rx) = test_delivery("{}");
    drop(handle);
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn test_default_handler_accepts_decodable_messages() {
    let broker = MemoryBroker::new();
    broker.create_subscription("orders", "worker").await;
    let subscriber = Subscriber::new(broker.subscription("worker").await.unwrap(), 4);
    subscriber.start_with_default_handler().await.unwrap();

    let envelope = codec::encode(&log_payload("hello")).unwrap();
    broker
        .topic("orders")
        .await
        .unwrap()
        .publish(envelope)
        .await
        .unwrap();

    for _ in 0..200 {
        if broker.acked_count("worker").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(broker.acked_count("worker").await, 1);
    subscriber.stop_listening().await.unwrap();
}

#[tokio::test]
async fn test_default_handler_rejects_undecodable_messages() {
    let broker = MemoryBroker::with_delivery_limits(2, Duration::ZERO);
    broker.create_subscription("orders", "worker").await;
    let subscriber = Subscriber::new(broker.subscription("worker").await.unwrap(), 4);
    subscriber.start_with_default_handler().await.unwrap();

    let garbage = Envelope {
        data: b"not json".to_vec(),
        attributes: HashMap::new(),
    };
    broker
        .topic("orders")
        .await
        .unwrap()
        .publish(garbage)
        .await
        .unwrap();

    for _ in 0..200 {
        if broker.dead_lettered_count("worker").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(broker.nacked_count("worker").await, 2);
    assert_eq!(broker.dead_lettered_count("worker").await, 1);
    assert_eq!(broker.acked_count("worker").await, 0);
    subscriber.stop_listening().await.unwrap();
}

#[tokio::test]
async fn test_listener_state_transitions() {
    let broker = MemoryBroker::new();
    broker.create_subscription("orders", "worker").await;
    let subscriber = Subscriber::new(broker.subscription("worker").await.unwrap(), 4);

    assert_eq!(subscriber.subscription_name(), "worker");
    assert_eq!(subscriber.state().await, ListenerState::Idle);

    subscriber.start_with_default_handler().await.unwrap();
    assert_eq!(subscriber.state().await, ListenerState::Listening);

    subscriber.stop_listening().await.unwrap();
    assert_eq!(subscriber.state().await, ListenerState::Stopped);

    // A stopped listener may start again.
    subscriber.start_with_default_handler().await.unwrap();
    assert_eq!(subscriber.state().await, ListenerState::Listening);
    subscriber.stop_listening().await.unwrap();
}

#[tokio::test]
async fn test_start_while_listening_is_ignored() {
    let broker = MemoryBroker::new();
    broker.create_subscription("orders", "worker").await;
    let subscriber = Subscriber::new(broker.subscription("worker").await.unwrap(), 4);

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    subscriber
        .start_listening(Arc::new(CountingHandler {
            seen: Arc::clone(&first),
        }))
        .await
        .unwrap();
    subscriber
        .start_listening(Arc::new(CountingHandler {
            seen: Arc::clone(&second),
        }))
        .await
        .unwrap();
    assert_eq!(subscriber.state().await, ListenerState::Listening);

    let envelope = codec::encode(&log_payload("one")).unwrap();
    broker
        .topic("orders")
        .await
        .unwrap()
        .publish(envelope)
        .await
        .unwrap();

    wait_for_count(&first, 1).await;
    assert_eq!(second.load(Ordering::SeqCst), 0);
    subscriber.stop_listening().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let broker = MemoryBroker::new();
    broker.create_subscription("orders", "worker").await;
    let subscriber = Subscriber::new(broker.subscription("worker").await.unwrap(), 4);

    // Stopping before ever starting is a quiet no-op.
    subscriber.stop_listening().await.unwrap();
    assert_eq!(subscriber.state().await, ListenerState::Idle);

    subscriber.start_with_default_handler().await.unwrap();
    subscriber.stop_listening().await.unwrap();
    subscriber.stop_listening().await.unwrap();
    assert_eq!(subscriber.state().await, ListenerState::Stopped);
}

#[tokio::test]
async fn test_stop_halts_delivery() {
    let broker = MemoryBroker::new();
    broker.create_subscription("orders", "worker").await;
    let subscriber = Subscriber::new(broker.subscription("worker").await.unwrap(), 4);
    let topic = broker.topic("orders").await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    subscriber
        .start_listening(Arc::new(CountingHandler {
            seen: Arc::clone(&seen),
        }))
        .await
        .unwrap();

    topic
        .publish(codec::encode(&log_payload("before")).unwrap())
        .await
        .unwrap();
    wait_for_count(&seen, 1).await;

    subscriber.stop_listening().await.unwrap();
    topic
        .publish(codec::encode(&log_payload("after")).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(broker.pending_count("worker").await, 1);
}

#[tokio::test]
async fn test_transport_errors_do_not_change_state() {
    // No provisioning: attaching surfaces a transport error event.
    let broker = MemoryBroker::new();
    let subscriber = Subscriber::new(broker.subscription("ghost").await.unwrap(), 4);

    let seen = Arc::new(AtomicUsize::new(0));
    subscriber
        .start_listening(Arc::new(CountingHandler {
            seen: Arc::clone(&seen),
        }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(subscriber.state().await, ListenerState::Listening);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    subscriber.stop_listening().await.unwrap();
}

#[tokio::test]
async fn test_max_in_flight_bounds_handler_concurrency() {
    let broker = MemoryBroker::new();
    broker.create_subscription("orders", "worker").await;
    let subscriber = Subscriber::new(broker.subscription("worker").await.unwrap(), 1);
    let topic = broker.topic("orders").await.unwrap();

    let entered = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    subscriber
        .start_listening(Arc::new(GatedHandler {
            entered: Arc::clone(&entered),
            gate: Arc::clone(&gate),
        }))
        .await
        .unwrap();

    for i in 0..3 {
        topic
            .publish(codec::encode(&log_payload(&format!("msg {i}"))).unwrap())
            .await
            .unwrap();
    }

    wait_for_count(&entered, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(entered.load(Ordering::SeqCst), 1, "second handler ran early");

    gate.add_permits(1);
    wait_for_count(&entered, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(entered.load(Ordering::SeqCst), 2, "third handler ran early");

    gate.add_permits(2);
    for _ in 0..200 {
        if broker.acked_count("worker").await == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(broker.acked_count("worker").await, 3);
    subscriber.stop_listening().await.unwrap();
}

#[tokio::test]
async fn test_retry_exhaustion_rejects_once() {
    let sleeper = Arc::new(RecordingSleeper::default());
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&invocations);
    let handler = RetryingHandler::with_sleeper(
        RetryPolicy::new(3, Duration::from_millis(250)),
        move |_delivery, _attempt| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(Error::processing("always fails"))
            }
        },
        sleeper.clone(),
    );

    let (handle, rx) = test_delivery("{}");
    handler.handle(handle).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(rx.await.unwrap(), Decision::Nack);
    // Two waits between three attempts, none after the last, each as long
    // as the configured backoff.
    assert_eq!(sleeper.delays(), vec![handler.policy().backoff(); 2]);
}

#[tokio::test]
async fn test_retry_accepts_on_eventual_success() {
    let sleeper = Arc::new(RecordingSleeper::default());
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&invocations);
    let handler = RetryingHandler::with_sleeper(
        RetryPolicy::new(3, Duration::from_millis(100)),
        move |_delivery, _attempt| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                    Err(Error::processing("flaky"))
                } else {
                    Ok(())
                }
            }
        },
        sleeper.clone(),
    );

    let (handle, rx) = test_delivery("{}");
    handler.handle(handle).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(rx.await.unwrap(), Decision::Ack);
    assert_eq!(sleeper.delays().len(), 2);
}

#[tokio::test]
async fn test_retry_succeeding_first_try_never_sleeps() {
    let sleeper = Arc::new(RecordingSleeper::default());
    let handler = RetryingHandler::with_sleeper(
        RetryPolicy::new(3, Duration::from_secs(1)),
        |delivery, _attempt| async move {
            delivery.decode_payload().map(|_| ())
        },
        sleeper.clone(),
    );

    let (handle, rx) = test_delivery(r#"{"tipo":"log"}"#);
    handler.handle(handle).await;

    assert_eq!(rx.await.unwrap(), Decision::Ack);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_retry_reports_attempt_numbers() {
    let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = Arc::clone(&attempts);
    let handler = RetryingHandler::new(
        RetryPolicy::new(3, Duration::ZERO),
        move |_delivery, attempt| {
            let record = Arc::clone(&record);
            async move {
                record.lock().unwrap().push(attempt);
                Err(Error::processing("nope"))
            }
        },
    );

    let (handle, _rx) = test_delivery("{}");
    handler.handle(handle).await;

    assert_eq!(*attempts.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_retry_policy_defaults_and_clamping() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts(), 3);
    assert_eq!(policy.backoff(), Duration::from_secs(1));

    assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
}
