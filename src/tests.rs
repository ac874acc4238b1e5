//! End-to-end scenarios driven against an in-memory mock broker instead of a
//! real socket: connect, subscribe, lose the connection mid-flight,
//! reconnect and resubscribe, ack/nack, and run a transaction to
//! completion. Unit-level coverage for the codec and the ack/nack policy
//! lives alongside the modules they test; this file is for behavior that
//! only shows up once the connection manager, listener, and subscription
//! registry are wired together the way [`crate::client::Client`] wires them.

use crate::client::error::StompError;
use crate::client::{Client, ClientConfig, ClientConfigBuilder};
use crate::frame::{Command, Frame};
use crate::subscription::{AckMode, AckableMessageFrame, HandlerError, SuppressedExceptionCallback};
use crate::transport::{ConnectOptions, ServerAddr, Transport, TransportError, TransportReader, TransportWriter};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A fake STOMP broker: records every frame a client writes, and lets a
/// test hand it frames (CONNECTED, MESSAGE, RECEIPT, ...) to deliver back.
/// CONNECT and DISCONNECT are auto-answered the way a real broker would,
/// since every scenario needs a working handshake and a clean shutdown
/// regardless of what it's actually testing.
struct MockBroker {
    written: Mutex<Vec<Frame>>,
    inbox: Mutex<VecDeque<Frame>>,
    notify: Notify,
    severed: AtomicBool,
    connect_count: AtomicUsize,
    fail_connect: AtomicBool,
}

impl MockBroker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            written: Mutex::new(Vec::new()),
            inbox: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            severed: AtomicBool::new(false),
            connect_count: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        })
    }

    fn push_message(&self, frame: Frame) {
        self.inbox.lock().expect("mock broker inbox mutex poisoned").push_back(frame);
        self.notify.notify_waiters();
    }

    /// Simulates a dropped TCP connection: the next read or write on any
    /// transport wrapping this broker fails until the next successful
    /// reconnect resets the flag.
    fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn written_commands(&self) -> Vec<Command> {
        self.written
            .lock()
            .expect("mock broker written mutex poisoned")
            .iter()
            .filter_map(|f| f.command())
            .collect()
    }
}

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MockBroker>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<MockBroker>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a fresh broker under a unique host name and returns a handle
/// to it. `MockTransport::connect` looks brokers up by `ServerAddr::host`.
fn register_broker(host: &str) -> Arc<MockBroker> {
    let broker = MockBroker::new();
    registry().lock().expect("registry mutex poisoned").insert(host.to_string(), Arc::clone(&broker));
    broker
}

fn unique_host(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("{prefix}-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

fn basic_config(host: &str) -> ClientConfig {
    ClientConfigBuilder::new()
        .server(ServerAddr::new(host, 0))
        .credentials("guest", "guest")
        .connect_retry_attempts(3)
        .connect_retry_interval(Duration::from_millis(10))
        .connect_timeout(Duration::from_secs(1))
        .disconnect_confirmation_timeout(Duration::from_secs(1))
        .build()
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let start = Instant::now();
    loop {
        if condition() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A transport over a [`MockBroker`] instead of a socket. One instance
/// exists per connect attempt, mirroring the real contract that a
/// transport is never reused across reconnects. `split()` hands out two
/// structs that each hold their own clone of the `Arc<MockBroker>`, since
/// the mock's state already lives in the broker rather than the
/// transport itself - there's nothing transport-side left to split.
struct MockTransport {
    broker: Arc<MockBroker>,
}

struct MockReader {
    broker: Arc<MockBroker>,
}

struct MockWriter {
    broker: Arc<MockBroker>,
}

fn mock_write_frame(broker: &MockBroker, frame: &Frame) -> Result<(), TransportError> {
    if broker.severed.load(Ordering::SeqCst) {
        return Err(TransportError::ClosedByPeer);
    }
    broker.written.lock().expect("mock broker written mutex poisoned").push(frame.clone());

    // Auto-answer the two frames every scenario needs regardless of what
    // it's actually exercising.
    match frame.command() {
        Some(Command::Connect) => {
            let connected = Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", "0,0")
                .header("server", "mock-broker/1.0");
            broker.push_message(connected);
        }
        Some(Command::Disconnect) => {
            if let Some(receipt_id) = frame.get_header("receipt") {
                let receipt = Frame::new(Command::Receipt).header("receipt-id", receipt_id.to_string());
                broker.push_message(receipt);
            }
        }
        _ => {}
    }
    Ok(())
}

async fn mock_read_frame(broker: &MockBroker) -> Result<Frame, TransportError> {
    loop {
        if let Some(frame) = broker.inbox.lock().expect("mock broker inbox mutex poisoned").pop_front() {
            return Ok(frame);
        }
        if broker.severed.load(Ordering::SeqCst) {
            return Err(TransportError::ClosedByPeer);
        }
        // A short timeout rather than a bare `.await` protects against a
        // wakeup racing a push_message/sever call landing between the
        // emptiness check above and the wait below.
        let _ = tokio::time::timeout(Duration::from_millis(20), broker.notify.notified()).await;
    }
}

impl Transport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    async fn connect(addr: &ServerAddr, _options: &ConnectOptions) -> Result<Self, TransportError> {
        let broker = registry().lock().expect("registry mutex poisoned").get(&addr.host).cloned();
        let Some(broker) = broker else {
            return Err(TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: "no mock broker registered for this host".to_string(),
            });
        };

        broker.connect_count.fetch_add(1, Ordering::SeqCst);
        if broker.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: "mock broker configured to refuse connections".to_string(),
            });
        }

        broker.severed.store(false, Ordering::SeqCst);
        Ok(Self { broker })
    }

    async fn close(&mut self) {}

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        mock_write_frame(&self.broker, frame)
    }

    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        mock_read_frame(&self.broker).await
    }

    fn split(self) -> (MockReader, MockWriter) {
        (MockReader { broker: Arc::clone(&self.broker) }, MockWriter { broker: self.broker })
    }
}

impl TransportReader for MockReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        mock_read_frame(&self.broker).await
    }
}

impl TransportWriter for MockWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        mock_write_frame(&self.broker, frame)
    }

    async fn write_heartbeat(&mut self) -> Result<(), TransportError> {
        if self.broker.severed.load(Ordering::SeqCst) {
            return Err(TransportError::ClosedByPeer);
        }
        Ok(())
    }

    async fn close(&mut self) {}
}

#[tokio::test]
async fn resubscribes_after_connection_loss_then_drains_on_disconnect() {
    let host = unique_host("resubscribe");
    let broker = register_broker(&host);
    let client = Client::<MockTransport>::connect(basic_config(&host)).await.expect("initial connect should succeed");

    let subscription = client
        .subscribe("/queue/X", AckMode::Client, Vec::new(), None, |_frame| async { Ok(()) })
        .await
        .expect("subscribe should succeed");

    wait_until(
        || broker.written_commands() == vec![Command::Connect, Command::Subscribe],
        Duration::from_secs(1),
    )
    .await;

    broker.sever();

    wait_until(
        || {
            broker.written_commands()
                == vec![Command::Connect, Command::Subscribe, Command::Connect, Command::Subscribe]
        },
        Duration::from_secs(2),
    )
    .await;

    client.send("/queue/Y", "hi", None, None, true, Vec::new()).await.expect("send should succeed");
    client.unsubscribe(subscription.id()).await;
    client.disconnect().await.expect("disconnect should succeed");

    assert_eq!(
        broker.written_commands(),
        vec![
            Command::Connect,
            Command::Subscribe,
            Command::Connect,
            Command::Subscribe,
            Command::Send,
            Command::Unsubscribe,
            Command::Disconnect,
        ]
    );
}

#[tokio::test]
async fn transaction_commits_all_sends_on_normal_completion() {
    let host = unique_host("txn-commit");
    let broker = register_broker(&host);
    let client = Client::<MockTransport>::connect(basic_config(&host)).await.expect("connect should succeed");

    let txn = client.begin().await.expect("begin should succeed");
    let txn_id = txn.id().to_string();
    for i in 0..5 {
        txn.send("/queue/orders", format!("order-{i}")).await.expect("send within transaction should succeed");
    }
    txn.commit().await.expect("commit should succeed");
    client.disconnect().await.expect("disconnect should succeed");

    let commands = broker.written_commands();
    assert_eq!(
        commands,
        vec![
            Command::Connect,
            Command::Begin,
            Command::Send,
            Command::Send,
            Command::Send,
            Command::Send,
            Command::Send,
            Command::Commit,
            Command::Disconnect,
        ]
    );

    let written = broker.written.lock().expect("mock broker written mutex poisoned");
    let send_count = written
        .iter()
        .filter(|f| f.command() == Some(Command::Send) && f.get_header("transaction") == Some(txn_id.as_str()))
        .count();
    assert_eq!(send_count, 5, "every SEND under the transaction must carry its transaction header");
}

#[tokio::test]
async fn transaction_aborts_when_the_caller_chooses_to() {
    let host = unique_host("txn-abort");
    let broker = register_broker(&host);
    let client = Client::<MockTransport>::connect(basic_config(&host)).await.expect("connect should succeed");

    let txn = client.begin().await.expect("begin should succeed");
    txn.send("/queue/orders", "order-1").await.expect("send within transaction should succeed");
    txn.abort().await.expect("abort should succeed");
    client.disconnect().await.expect("disconnect should succeed");

    assert_eq!(
        broker.written_commands(),
        vec![Command::Connect, Command::Begin, Command::Send, Command::Abort, Command::Disconnect]
    );
}

#[tokio::test]
async fn auto_ack_subscription_acks_on_handler_success() {
    let host = unique_host("auto-ack-success");
    let broker = register_broker(&host);
    let client = Client::<MockTransport>::connect(basic_config(&host)).await.expect("connect should succeed");

    let subscription = client
        .subscribe("/queue/work", AckMode::ClientIndividual, Vec::new(), None, |_frame| async { Ok(()) })
        .await
        .expect("subscribe should succeed");

    wait_until(|| broker.written_commands().contains(&Command::Subscribe), Duration::from_secs(1)).await;

    broker.push_message(
        Frame::new(Command::Message)
            .header("subscription", subscription.id())
            .header("ack", "a1")
            .header("destination", "/queue/work")
            .header("message-id", "m1"),
    );

    wait_until(
        || broker.written.lock().expect("mutex poisoned").iter().any(|f| f.command() == Some(Command::Ack)),
        Duration::from_secs(1),
    )
    .await;

    let written = broker.written.lock().expect("mock broker written mutex poisoned");
    let ack = written.iter().find(|f| f.command() == Some(Command::Ack)).expect("an ACK frame should be present");
    assert_eq!(ack.get_header("id"), Some("a1"));
    assert_eq!(ack.get_header("subscription"), Some(subscription.id()));
}

#[tokio::test]
async fn auto_ack_subscription_nacks_and_notifies_on_handler_failure() {
    let host = unique_host("auto-ack-failure");
    let broker = register_broker(&host);
    let client = Client::<MockTransport>::connect(basic_config(&host)).await.expect("connect should succeed");

    let invoked: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let invoked_for_callback = Arc::clone(&invoked);
    let on_suppressed: SuppressedExceptionCallback = Arc::new(move |err, _frame| {
        invoked_for_callback.lock().expect("invocations mutex poisoned").push(err.to_string());
    });

    let subscription = client
        .subscribe("/queue/work", AckMode::ClientIndividual, Vec::new(), Some(on_suppressed), |_frame| async {
            Err(HandlerError::new("handler exploded"))
        })
        .await
        .expect("subscribe should succeed");

    wait_until(|| broker.written_commands().contains(&Command::Subscribe), Duration::from_secs(1)).await;

    broker.push_message(
        Frame::new(Command::Message)
            .header("subscription", subscription.id())
            .header("ack", "a2")
            .header("destination", "/queue/work")
            .header("message-id", "m2"),
    );

    wait_until(
        || broker.written.lock().expect("mutex poisoned").iter().any(|f| f.command() == Some(Command::Nack)),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(invoked.lock().expect("invocations mutex poisoned").as_slice(), ["handler exploded"]);
}

/// Scenario: an `AckableMessageFrame` captured before a reconnect must not
/// put an ACK on the wire once the connection generation has moved on.
#[tokio::test]
async fn manual_ack_is_suppressed_once_captured_before_a_reconnect() {
    let host = unique_host("stale-ack");
    let broker = register_broker(&host);
    let client = Client::<MockTransport>::connect(basic_config(&host)).await.expect("connect should succeed");

    let captured: Arc<Mutex<Option<AckableMessageFrame>>> = Arc::new(Mutex::new(None));
    let captured_for_handler = Arc::clone(&captured);

    let subscription = client
        .subscribe_with_manual_ack("/queue/work", Vec::new(), move |ackable| {
            let captured = Arc::clone(&captured_for_handler);
            async move {
                *captured.lock().expect("captured mutex poisoned") = Some(ackable);
            }
        })
        .await
        .expect("subscribe should succeed");

    wait_until(|| broker.written_commands().contains(&Command::Subscribe), Duration::from_secs(1)).await;

    broker.push_message(
        Frame::new(Command::Message)
            .header("subscription", subscription.id())
            .header("ack", "a3")
            .header("destination", "/queue/work")
            .header("message-id", "m3"),
    );

    wait_until(|| captured.lock().expect("captured mutex poisoned").is_some(), Duration::from_secs(1)).await;

    let connects_before = broker.connect_count.load(Ordering::SeqCst);
    broker.sever();
    wait_until(|| broker.connect_count.load(Ordering::SeqCst) > connects_before, Duration::from_secs(2)).await;

    let ackable = captured.lock().expect("captured mutex poisoned").take().expect("handler should have run");
    ackable.ack().await.expect("a stale ack is suppressed, not an error");

    // Give a buggy suppression a moment to misbehave before asserting its absence.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !broker.written.lock().expect("mutex poisoned").iter().any(|f| f.command() == Some(Command::Ack)),
        "no ACK should be written for a message delivered under a since-replaced connection"
    );

    client.disconnect().await.expect("disconnect should succeed");
}

#[tokio::test]
async fn connect_fails_after_exhausting_every_server_and_retry() {
    let host = unique_host("unreachable");
    let broker = register_broker(&host);
    broker.fail_connect.store(true, Ordering::SeqCst);

    let config = ClientConfigBuilder::new()
        .server(ServerAddr::new(host, 0))
        .credentials("guest", "guest")
        .connect_retry_attempts(2)
        .connect_retry_interval(Duration::from_millis(5))
        .connect_timeout(Duration::from_millis(200))
        .build();

    let result = Client::<MockTransport>::connect(config).await;
    assert!(matches!(result, Err(StompError::FailedAllConnectAttempts { .. })));
}
