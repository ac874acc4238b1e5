// ABOUTME: The public Client facade - ties the connection manager, subscription registry, heartbeat, and listener together
// ABOUTME: A scoped resource: `connect()` starts everything, `disconnect()` (or drop) tears it down in the order the design doc requires

use crate::client::config::ClientConfig;
use crate::client::error::StompResult;
use crate::connection::{ConnectionManager, ConnectionParameters};
use crate::frame::{Command, Frame};
use crate::heartbeat;
use crate::listener::{self, ErrorFrameCallback, HeartbeatCallback, ListenerContext, ReceiptWaiters};
use crate::subscription::{
    ActiveSubscriptions, AckMode, AckableMessageFrame, Handler, HandlerKind, ManualHandler, Subscription,
    SuppressedExceptionCallback,
};
use crate::transaction::Transaction;
use crate::transport::Transport;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A connected STOMP client. Obtain one with [`Client::connect`]; always
/// pair it with [`Client::disconnect`] (or let it run to the end of a
/// scope that calls it) so the listener and heartbeat tasks are stopped
/// and outstanding subscriptions are allowed to drain.
pub struct Client<T: Transport + 'static> {
    manager: Arc<ConnectionManager<T>>,
    subscriptions: Arc<ActiveSubscriptions>,
    receipts: Arc<ReceiptWaiters>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    disconnect_confirmation_timeout: std::time::Duration,
}

impl<T: Transport + 'static> Client<T> {
    /// Establishes the connection (running the full connect-retry loop)
    /// and starts the listener and heartbeat tasks. Returns
    /// `FailedAllConnectAttempts` before any subscription or send call
    /// becomes possible if every server is unreachable.
    pub async fn connect(config: ClientConfig) -> StompResult<Self> {
        Self::connect_with_callbacks(config, None, None).await
    }

    pub async fn connect_with_callbacks(
        config: ClientConfig,
        on_error_frame: Option<ErrorFrameCallback>,
        on_heartbeat: Option<HeartbeatCallback>,
    ) -> StompResult<Self> {
        let params = ConnectionParameters {
            servers: config.servers,
            login: config.login,
            passcode: config.passcode,
            virtual_host: config.virtual_host,
            heartbeat: config.heartbeat,
            connect_retry_attempts: config.connect_retry_attempts,
            connect_retry_interval: config.connect_retry_interval,
            connect_timeout: config.connect_timeout,
            read_max_chunk_size: config.read_max_chunk_size,
            ssl: config.ssl,
            strict_unknown_commands: config.strict_unknown_commands,
        };

        let manager = Arc::new(ConnectionManager::<T>::new(params));
        manager.connect().await?;

        let subscriptions = Arc::new(ActiveSubscriptions::new(manager.generation_handle()));
        let receipts = Arc::new(ReceiptWaiters::new());
        let cancel = CancellationToken::new();

        let mut tasks = Vec::new();
        let (sender, watchdog) = heartbeat::spawn(Arc::clone(&manager), cancel.clone());
        tasks.push(sender);
        tasks.push(watchdog);

        let listener_ctx = ListenerContext {
            manager: Arc::clone(&manager),
            subscriptions: Arc::clone(&subscriptions),
            receipts: Arc::clone(&receipts),
            on_error_frame,
            on_heartbeat,
        };
        tasks.push(tokio::spawn(listener::run(listener_ctx, cancel.clone())));

        Ok(Self {
            manager,
            subscriptions,
            receipts,
            cancel,
            tasks,
            disconnect_confirmation_timeout: config.disconnect_confirmation_timeout,
        })
    }

    /// Sends a SEND frame. `add_content_length` controls whether a
    /// `content-length` header is computed from `body`; user-supplied
    /// `headers` are merged last and may override any computed header
    /// except `destination`.
    pub async fn send(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        transaction: Option<&str>,
        content_type: Option<&str>,
        add_content_length: bool,
        headers: Vec<(String, String)>,
    ) -> StompResult<()> {
        let body = body.into();
        let mut frame = Frame::with_body(Command::Send, body.clone()).header("destination", destination.to_string());
        if add_content_length {
            frame = frame.header("content-length", body.len().to_string());
        }
        if let Some(content_type) = content_type {
            frame = frame.header("content-type", content_type.to_string());
        }
        if let Some(transaction) = transaction {
            frame = frame.header("transaction", transaction.to_string());
        }
        for (name, value) in headers {
            if name == "destination" {
                continue;
            }
            frame = frame.header(name, value);
        }
        self.manager.write_frame_reconnecting(&frame).await
    }

    /// Subscribes with an auto-managed ack policy: the handler's `Result`
    /// drives ACK/NACK automatically (for ack modes that require one).
    #[allow(clippy::too_many_arguments)]
    pub async fn subscribe<F, Fut>(
        &self,
        destination: &str,
        ack: AckMode,
        headers: Vec<(String, String)>,
        on_suppressed_exception: Option<SuppressedExceptionCallback>,
        handler: F,
    ) -> StompResult<Subscription>
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), crate::subscription::HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |frame| Box::pin(handler(frame)));
        self.subscribe_with_kind(destination, ack, headers, HandlerKind::Auto(handler), on_suppressed_exception)
            .await
    }

    /// Subscribes with `ack=client-individual` and hands the handler an
    /// [`AckableMessageFrame`] it must call `.ack()`/`.nack()` on itself.
    pub async fn subscribe_with_manual_ack<F, Fut>(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
        handler: F,
    ) -> StompResult<Subscription>
    where
        F: Fn(AckableMessageFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ManualHandler = Arc::new(move |ackable| Box::pin(handler(ackable)));
        self.subscribe_with_kind(destination, AckMode::ClientIndividual, headers, HandlerKind::Manual(handler), None)
            .await
    }

    async fn subscribe_with_kind(
        &self,
        destination: &str,
        ack: AckMode,
        headers: Vec<(String, String)>,
        handler: HandlerKind,
        on_suppressed_exception: Option<SuppressedExceptionCallback>,
    ) -> StompResult<Subscription> {
        let subscription = self.subscriptions.add(destination, ack, headers, handler, on_suppressed_exception);
        self.manager.write_frame_reconnecting(&subscription.subscribe_frame()).await?;
        Ok(subscription)
    }

    /// Unsubscribes `id`. The UNSUBSCRIBE frame is best-effort: failures
    /// are logged, not propagated, since the broker is entitled to assume
    /// a dead connection means we're gone anyway.
    pub async fn unsubscribe(&self, id: &str) {
        let frame = Frame::new(Command::Unsubscribe).header("id", id.to_string());
        self.subscriptions.remove(id);
        self.manager.maybe_write_frame(&frame).await;
    }

    pub async fn begin(&self) -> StompResult<Transaction<T>> {
        Transaction::begin(Arc::clone(&self.manager)).await
    }

    /// Sends DISCONNECT with a `receipt` header, waits for the matching
    /// RECEIPT (bounded by `disconnect_confirmation_timeout`), stops the
    /// listener and heartbeat tasks, and waits for the subscription
    /// registry to drain before returning.
    pub async fn disconnect(self) -> StompResult<()> {
        let receipt_id = Uuid::new_v4().to_string();
        let waiter = self.receipts.register(receipt_id.clone());
        let disconnect_frame = Frame::new(Command::Disconnect).header("receipt", receipt_id);

        if self.manager.write_frame_reconnecting(&disconnect_frame).await.is_ok() {
            let _ = tokio::time::timeout(self.disconnect_confirmation_timeout, waiter).await;
        }

        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }

        self.subscriptions.wait_until_empty().await;
        self.manager.clear_active_connection_state("client disconnect").await;
        Ok(())
    }
}

