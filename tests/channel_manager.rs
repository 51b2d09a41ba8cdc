//! Channel connection manager invariants.
//!
//! These tests lock in the lifecycle contract:
//! - at most one connection exists at any instant, across any sequence of
//!   identity transitions (including rapid A→B→A);
//! - `connect` is idempotent per identity;
//! - re-keying detaches the old connection's listener before the new one
//!   exists (no duplicate notification delivery);
//! - transport-level reconnects under the same identity never re-key.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use url::Url;

use tasksync::channel::{
    ChannelEvent, ChannelHandle, ChannelManager, ChannelOptions, ChannelSignal, ChannelStatus,
    ChannelTransport,
};
use tasksync::config::ReconnectPolicy;
use tasksync::error::{Result, TransportError};
use tasksync::types::Identity;

/// Concurrency counters shared between the transport and its handles.
#[derive(Default)]
struct Counts {
    opens: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
}

/// Remote control for one mock connection: inject events, observe close,
/// simulate permanent death.
struct Controller {
    identity_tag: Option<String>,
    events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    closed: Arc<AtomicBool>,
}

impl Controller {
    /// Inject an event; returns false once the connection is gone.
    fn send(&self, event: ChannelEvent) -> bool {
        match &*self.events.lock() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the transport giving up for good (reconnect policy
    /// exhausted): the handle's event stream ends.
    fn die(&self) {
        self.events.lock().take();
    }
}

/// Mock transport recording every open and the peak connection concurrency.
#[derive(Default)]
struct MockTransport {
    counts: Arc<Counts>,
    controllers: Mutex<Vec<Arc<Controller>>>,
}

impl MockTransport {
    fn last_controller(&self) -> Arc<Controller> {
        self.controllers
            .lock()
            .last()
            .cloned()
            .expect("no connection opened")
    }
}

struct MockHandle {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    closed: Arc<AtomicBool>,
    counts: Arc<Counts>,
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn open(
        &self,
        _endpoint: &Url,
        options: ChannelOptions,
    ) -> Result<Box<dyn ChannelHandle>> {
        self.counts.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.counts.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.counts.max_open.fetch_max(now, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        // Transport-level connect event, as a real transport would emit.
        tx.send(ChannelEvent::Connected).unwrap();
        let closed = Arc::new(AtomicBool::new(false));
        self.controllers.lock().push(Arc::new(Controller {
            identity_tag: options.identity_tag,
            events: Mutex::new(Some(tx)),
            closed: closed.clone(),
        }));
        Ok(Box::new(MockHandle {
            events: rx,
            closed,
            counts: self.counts.clone(),
        }))
    }

    fn transport_type(&self) -> &'static str {
        "mock"
    }
}

#[async_trait]
impl ChannelHandle for MockHandle {
    async fn next_event(&mut self) -> Result<ChannelEvent> {
        match self.events.recv().await {
            Some(event) => Ok(event),
            None => Err(TransportError::ConnectionClosed.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counts.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        // A handle dropped without close() (pump ended on an error) still
        // stops counting as open.
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counts.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Poll a condition until it holds or the test times out.
async fn wait_until(pred: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

fn manager() -> (ChannelManager, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let manager = ChannelManager::new(
        Url::parse("ws://localhost:5000").unwrap(),
        ReconnectPolicy::default(),
        transport.clone(),
    );
    (manager, transport)
}

#[tokio::test]
async fn at_most_one_connection_across_rapid_rekeys() {
    let (manager, transport) = manager();
    let a = Identity::new("a");
    let b = Identity::new("b");

    manager.connect(&a).await.unwrap();
    manager.connect(&b).await.unwrap();
    manager.connect(&a).await.unwrap();

    assert_eq!(transport.counts.max_open.load(Ordering::SeqCst), 1);
    assert_eq!(transport.counts.opens.load(Ordering::SeqCst), 3);
    assert_eq!(manager.current_key().as_deref(), Some("a"));
    assert_eq!(
        transport.last_controller().identity_tag.as_deref(),
        Some("a")
    );

    manager.disconnect().await.unwrap();
    assert_eq!(manager.current_key(), None);
    assert_eq!(manager.status(), ChannelStatus::Closed);
    assert_eq!(transport.counts.open_now.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connect_is_idempotent_for_the_same_identity() {
    let (manager, transport) = manager();
    let identity = Identity::new("u1");

    manager.connect(&identity).await.unwrap();
    manager.connect(&identity).await.unwrap();
    manager.connect(&identity).await.unwrap();

    assert_eq!(transport.counts.opens.load(Ordering::SeqCst), 1);
    assert_eq!(manager.current_key().as_deref(), Some("u1"));
}

#[tokio::test]
async fn disconnect_is_idempotent_when_no_connection_exists() {
    let (manager, transport) = manager();
    manager.disconnect().await.unwrap();
    manager.disconnect().await.unwrap();
    assert_eq!(transport.counts.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rekey_does_not_deliver_duplicate_notifications() {
    let (manager, transport) = manager();
    let mut signals = manager.subscribe();

    manager.connect(&Identity::new("a")).await.unwrap();
    let old = transport.last_controller();
    manager.connect(&Identity::new("b")).await.unwrap();
    let new = transport.last_controller();

    // The old connection was fully closed before the new one was opened.
    assert!(old.closed.load(Ordering::SeqCst));

    // A late event from the old connection goes nowhere: its pump is gone.
    let _ = old.send(ChannelEvent::TaskUpdate {
        payload: serde_json::json!({"from": "a"}),
    });
    assert!(new.send(ChannelEvent::TaskUpdate {
        payload: serde_json::json!({"from": "b"}),
    }));

    // Exactly one change notification arrives, from the new connection.
    let mut notifications = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), signals.recv()).await {
            Ok(Ok(ChannelSignal::ChangeNotification(payload))) => notifications.push(payload),
            Ok(Ok(ChannelSignal::Opened)) => {},
            Ok(Err(e)) => panic!("signal stream error: {e}"),
            Err(_) => break,
        }
    }
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["from"], "b");
}

#[tokio::test]
async fn transport_reconnect_under_same_identity_does_not_rekey() {
    let (manager, transport) = manager();
    manager.connect(&Identity::new("u1")).await.unwrap();
    let controller = transport.last_controller();

    // Transient network drop followed by the transport's own reconnect.
    assert!(controller.send(ChannelEvent::Disconnected {
        reason: "transport error".to_string(),
    }));
    assert!(controller.send(ChannelEvent::Connected));

    // Give the pump a moment to process.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.current_key().as_deref(), Some("u1"));
    assert_eq!(transport.counts.opens.load(Ordering::SeqCst), 1);
    assert_eq!(manager.status(), ChannelStatus::Open);
}

#[tokio::test]
async fn dead_connection_is_replaced_on_the_next_connect() {
    let (manager, transport) = manager();
    let identity = Identity::new("u1");
    manager.connect(&identity).await.unwrap();

    // The transport gives up for good; the pump observes the closed
    // connection and clears the key.
    transport.last_controller().die();
    wait_until(|| manager.current_key().is_none()).await;
    assert_eq!(manager.status(), ChannelStatus::Closed);

    // Connecting again for the same identity must open a fresh
    // connection, not no-op against the dead slot.
    manager.connect(&identity).await.unwrap();
    assert_eq!(transport.counts.opens.load(Ordering::SeqCst), 2);
    assert_eq!(transport.counts.open_now.load(Ordering::SeqCst), 1);
    assert_eq!(manager.current_key().as_deref(), Some("u1"));
}

#[tokio::test]
async fn subscribers_do_not_affect_the_connection_lifecycle() {
    let (manager, transport) = manager();
    let first = manager.subscribe();
    drop(first);

    manager.connect(&Identity::new("u1")).await.unwrap();
    let mut late = manager.subscribe();
    assert!(transport.last_controller().send(ChannelEvent::TaskUpdate {
        payload: serde_json::json!({}),
    }));

    let signal = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match late.recv().await.unwrap() {
                ChannelSignal::ChangeNotification(_) => break,
                ChannelSignal::Opened => {},
            }
        }
    })
    .await;
    assert!(signal.is_ok(), "late subscriber missed the notification");
    assert_eq!(transport.counts.opens.load(Ordering::SeqCst), 1);
}
