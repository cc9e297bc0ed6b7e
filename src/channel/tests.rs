use super::*;
use crate::config::ChannelConfig;
use crate::error::{TransportError, TreelightError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn fast_config(base_delay_ms: u64, growth_factor: u32, max_delay_ms: u64) -> ChannelConfig {
    ChannelConfig {
        base_delay_ms,
        max_delay_ms,
        growth_factor,
        receive_timeout_ms: 20,
        redelivery_ms: 50,
    }
}

type Receipt = Result<Option<Message>, TransportError>;

/// Transport replaying a script of receive results
struct ScriptedTransport {
    receipts: Mutex<VecDeque<Receipt>>,
    completed: Mutex<Vec<u64>>,
    send_attempts: AtomicU32,
    fail_sends: bool,
}

impl ScriptedTransport {
    fn new(receipts: Vec<Receipt>) -> Arc<Self> {
        Arc::new(Self {
            receipts: Mutex::new(receipts.into()),
            completed: Mutex::new(Vec::new()),
            send_attempts: AtomicU32::new(0),
            fail_sends: false,
        })
    }

    fn failing_sends() -> Arc<Self> {
        Arc::new(Self {
            receipts: Mutex::new(VecDeque::new()),
            completed: Mutex::new(Vec::new()),
            send_attempts: AtomicU32::new(0),
            fail_sends: true,
        })
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        let next = self.receipts.lock().pop_front();
        match next {
            Some(receipt) => receipt,
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn complete(&self, message: &Message) -> Result<(), TransportError> {
        self.completed.lock().push(message.id);
        Ok(())
    }

    async fn send(&self, destination: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends {
            return Err(TransportError::Send {
                destination: destination.to_string(),
                details: "link down".to_string(),
            });
        }
        Ok(())
    }
}

fn message(id: u64, payload: &str) -> Message {
    Message {
        id,
        source: "detector".to_string(),
        payload: payload.as_bytes().to_vec(),
        delivery_count: 1,
    }
}

fn receive_failure() -> Receipt {
    Err(TransportError::Receive {
        details: "connection reset".to_string(),
    })
}

#[tokio::test]
async fn test_failures_back_off_then_success_resets() {
    let transport = ScriptedTransport::new(vec![
        receive_failure(),
        receive_failure(),
        receive_failure(),
        Ok(Some(message(7, "{}"))),
    ]);
    let mut channel = ResilientChannel::new(transport, &fast_config(1, 10, 50));
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let received = timeout(Duration::from_secs(2), channel.next(&cancel))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.id, 7);
    // 1ms + 10ms + 50ms
    assert!(started.elapsed() >= Duration::from_millis(61));
    assert_eq!(channel.current_delay(), Duration::from_millis(1));
    assert_eq!(channel.stats().snapshot().receive_failures, 3);
}

#[tokio::test]
async fn test_empty_poll_resets_backoff() {
    let transport = ScriptedTransport::new(vec![
        receive_failure(),
        receive_failure(),
        Ok(None),
        receive_failure(),
        Ok(Some(message(1, "{}"))),
    ]);
    let mut channel = ResilientChannel::new(transport, &fast_config(2, 30, 5000));
    let cancel = CancellationToken::new();

    let started = Instant::now();
    timeout(Duration::from_secs(5), channel.next(&cancel))
        .await
        .unwrap()
        .unwrap();

    // 2 + 60 + 2 after the reset, rather than 2 + 60 + 1800 without it
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff_sleep() {
    let transport = ScriptedTransport::new(vec![receive_failure()]);
    let mut channel = ResilientChannel::new(transport, &fast_config(10_000, 10, 600_000));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = timeout(Duration::from_secs(1), channel.next(&cancel)).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_send_failure_is_returned_without_retry() {
    let transport = ScriptedTransport::failing_sends();
    let channel = ResilientChannel::new(transport.clone(), &fast_config(1, 10, 50));
    let sender = channel.sender("tree");

    let result = sender.send_best_effort(b"{}".to_vec()).await;

    assert!(matches!(result, Err(TransportError::Send { .. })));
    assert_eq!(transport.send_attempts.load(Ordering::SeqCst), 1);
    let stats = channel.stats().snapshot();
    assert_eq!(stats.sends, 1);
    assert_eq!(stats.send_failures, 1);
}

#[tokio::test]
async fn test_hub_routes_between_devices() {
    let hub = MessageHub::new(Duration::from_secs(30));
    let detector = hub.endpoint("detector");
    let tree = hub.endpoint("tree");

    detector.send("tree", b"hello".to_vec()).await.unwrap();

    let received = tree.receive(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(received.payload_str(), Some("hello"));
    assert_eq!(received.source, "detector");
    assert_eq!(received.delivery_count, 1);

    tree.complete(&received).await.unwrap();
    assert_eq!(hub.depth("tree"), 0);
    assert!(tree.receive(Duration::from_millis(10)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_hub_preserves_send_order() {
    let hub = MessageHub::new(Duration::from_secs(30));
    let detector = hub.endpoint("detector");
    let tree = hub.endpoint("tree");

    for payload in ["one", "two", "three"] {
        detector.send("tree", payload.as_bytes().to_vec()).await.unwrap();
    }

    let mut seen = Vec::new();
    while let Some(message) = tree.receive(Duration::from_millis(10)).await.unwrap() {
        seen.push(message.payload_str().unwrap_or_default().to_string());
        tree.complete(&message).await.unwrap();
    }
    assert_eq!(seen, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_hub_unknown_destination() {
    let hub = MessageHub::new(Duration::from_secs(30));
    let detector = hub.endpoint("detector");

    match detector.send("garage", Vec::new()).await {
        Err(TransportError::UnknownDestination(name)) => assert_eq!(name, "garage"),
        other => panic!("Expected UnknownDestination, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hub_redelivers_uncompleted_messages() {
    let hub = MessageHub::new(Duration::from_millis(30));
    let detector = hub.endpoint("detector");
    let tree = hub.endpoint("tree");
    detector.send("tree", b"reading".to_vec()).await.unwrap();

    let first = tree.receive(Duration::from_millis(10)).await.unwrap().unwrap();
    // Locked: not visible again straight away
    assert!(tree.receive(Duration::from_millis(5)).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(40)).await;
    let second = tree.receive(Duration::from_millis(10)).await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.delivery_count, 2);

    // The stale lock from the first delivery is gone
    tree.complete(&second).await.unwrap();
    assert!(tree.complete(&first).await.is_err());
}

#[tokio::test]
async fn test_hub_wakes_blocked_receiver() {
    let hub = MessageHub::new(Duration::from_secs(30));
    let detector = hub.endpoint("detector");
    let tree = hub.endpoint("tree");

    let receiver = tokio::spawn(async move { tree.receive(Duration::from_secs(2)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    detector.send("tree", b"late".to_vec()).await.unwrap();

    let received = timeout(Duration::from_millis(500), receiver)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(received.is_some());
}

#[tokio::test]
async fn test_closed_hub_fails_calls() {
    let hub = MessageHub::new(Duration::from_secs(30));
    let tree = hub.endpoint("tree");
    hub.close();

    assert_eq!(
        tree.receive(Duration::from_millis(10)).await,
        Err(TransportError::Closed)
    );
    assert_eq!(tree.send("tree", Vec::new()).await, Err(TransportError::Closed));
}

/// Fails the first attempt at every message, then succeeds
struct FlakyHandler {
    attempts: AtomicU32,
    handled: Mutex<Vec<(u64, u32)>>,
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    async fn handle(&self, message: &Message) -> Result<(), TreelightError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.handled.lock().push((message.id, message.delivery_count));
        if attempt == 0 {
            return Err(TreelightError::component("test", "not ready"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_processing_leaves_message_for_redelivery() {
    let hub = MessageHub::new(Duration::from_millis(30));
    let detector = hub.endpoint("detector");
    let tree = Arc::new(hub.endpoint("tree"));
    detector.send("tree", b"{}".to_vec()).await.unwrap();

    let channel = ResilientChannel::new(tree, &fast_config(1, 10, 50));
    let stats = channel.stats();
    let handler = Arc::new(FlakyHandler {
        attempts: AtomicU32::new(0),
        handled: Mutex::new(Vec::new()),
    });
    let cancel = CancellationToken::new();
    let task = tokio::spawn(channel.run(handler.clone(), cancel.clone()));

    let deadline = Instant::now() + Duration::from_secs(2);
    while stats.snapshot().completed == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

    let handled = handler.handled.lock().clone();
    assert_eq!(handled.len(), 2);
    assert_eq!(handled[0].0, handled[1].0);
    assert_eq!(handled[1].1, 2);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.handler_failures, 1);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(hub.depth("tree"), 0);
}
