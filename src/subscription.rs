//! Subscription registry and ack/nack state machine.
//!
//! Grounded on the reference client's `ActiveSubscriptions`: a map from
//! subscription id to subscription, plus an emptiness event the lifespan
//! scope waits on before it's allowed to return.

use crate::client::error::StompResult;
use crate::connection::Generation;
use crate::frame::{Command, Frame};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

/// STOMP ack mode, as declared on SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    fn requires_ack(self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

/// An error a subscription handler raised while processing a MESSAGE.
#[derive(Debug)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
/// A handler for an auto-managed subscription: returning `Err` in the
/// suppressed-exception sense sends NACK, `Ok` sends ACK (ack modes that
/// require one).
pub type Handler = Arc<dyn Fn(Frame) -> HandlerFuture + Send + Sync>;

pub type ManualHandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A handler for a manual-ack subscription: it receives the message
/// wrapped so it can call `.ack()`/`.nack()` on its own schedule.
pub type ManualHandler = Arc<dyn Fn(AckableMessageFrame) -> ManualHandlerFuture + Send + Sync>;

/// Closure used to actually put an ACK/NACK frame on the wire. The
/// listener loop supplies one backed by
/// `ConnectionManager::maybe_write_frame` - resurrecting a connection
/// just to deliver an ack isn't worth it.
pub type AckWriter = Arc<dyn Fn(Frame) -> Pin<Box<dyn Future<Output = StompResult<()>> + Send>> + Send + Sync>;

#[derive(Clone)]
pub enum HandlerKind {
    Auto(Handler),
    Manual(ManualHandler),
}

/// Invoked once per NACK'd message, with the error that triggered it and
/// the MESSAGE frame it was processing.
pub type SuppressedExceptionCallback = Arc<dyn Fn(&HandlerError, &Frame) + Send + Sync>;

/// A live subscription. Cheap to clone; the registry and any
/// `AckableMessageFrame`s it hands out share the same id.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) id: String,
    pub(crate) destination: String,
    pub(crate) ack_mode: AckMode,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) handler: HandlerKind,
    pub(crate) on_suppressed_exception: Option<SuppressedExceptionCallback>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn subscribe_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Subscribe)
            .header("id", self.id.clone())
            .header("destination", self.destination.clone())
            .header("ack", self.ack_mode.as_str());
        for (name, value) in &self.headers {
            frame = frame.header(name.clone(), value.clone());
        }
        frame
    }
}

/// Registry of live subscriptions plus the emptiness gate the client
/// lifespan scope waits on at shutdown.
///
/// Mirrors the reference implementation's `ActiveSubscriptions`: the
/// `Notify` is signalled whenever the map transitions to empty, and
/// `wait_until_empty` simply awaits whichever notification finds it so.
/// The shared `generation` counter is owned by the connection manager;
/// this registry only ever reads it, to stamp messages handed to manual-
/// ack handlers with the connection generation in effect at delivery.
///
/// Backed by an insertion-ordered `Vec` rather than a `HashMap`: resubscribe-
/// on-reconnect must replay SUBSCRIBE frames in the order subscriptions were
/// created, and a hash map's iteration order doesn't promise that.
pub struct ActiveSubscriptions {
    subscriptions: Mutex<Vec<(String, Subscription)>>,
    empty: Notify,
    generation: Generation,
}

impl ActiveSubscriptions {
    pub fn new(generation: Generation) -> Self {
        let empty = Notify::new();
        empty.notify_one();
        Self {
            subscriptions: Mutex::new(Vec::new()),
            empty,
            generation,
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn add(
        &self,
        destination: impl Into<String>,
        ack_mode: AckMode,
        headers: Vec<(String, String)>,
        handler: HandlerKind,
        on_suppressed_exception: Option<SuppressedExceptionCallback>,
    ) -> Subscription {
        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            destination: destination.into(),
            ack_mode,
            headers,
            handler,
            on_suppressed_exception,
        };
        let mut guard = self.subscriptions.lock().expect("subscriptions mutex poisoned");
        guard.push((subscription.id.clone(), subscription.clone()));
        subscription
    }

    pub fn remove(&self, id: &str) {
        let mut guard = self.subscriptions.lock().expect("subscriptions mutex poisoned");
        guard.retain(|(existing_id, _)| existing_id != id);
        if guard.is_empty() {
            self.empty.notify_waiters();
            self.empty.notify_one();
        }
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .expect("subscriptions mutex poisoned")
            .iter()
            .find(|(existing_id, _)| existing_id == id)
            .map(|(_, subscription)| subscription.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.subscriptions
            .lock()
            .expect("subscriptions mutex poisoned")
            .iter()
            .any(|(existing_id, _)| existing_id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().expect("subscriptions mutex poisoned").is_empty()
    }

    /// Every live subscription, in the order it was created - used to
    /// replay SUBSCRIBE in the same order after a reconnect.
    pub fn all(&self) -> Vec<Subscription> {
        self.subscriptions
            .lock()
            .expect("subscriptions mutex poisoned")
            .iter()
            .map(|(_, subscription)| subscription.clone())
            .collect()
    }

    /// Resolves once the registry is empty. If it already is, resolves
    /// immediately.
    pub async fn wait_until_empty(&self) {
        if self.is_empty() {
            return;
        }
        self.empty.notified().await;
    }
}

/// A MESSAGE frame handed to a manual-ack handler. `ack()`/`nack()` are
/// no-ops - logged at DEBUG, not errors - when the subscription has been
/// removed or the connection has since been re-established, since the
/// broker has no memory of an ack-id minted against a dead connection.
pub struct AckableMessageFrame {
    pub frame: Frame,
    subscription_id: String,
    captured_generation: u64,
    subscriptions: Arc<ActiveSubscriptions>,
    writer: AckWriter,
}

impl AckableMessageFrame {
    pub(crate) fn new(
        frame: Frame,
        subscription_id: String,
        captured_generation: u64,
        subscriptions: Arc<ActiveSubscriptions>,
        writer: AckWriter,
    ) -> Self {
        Self {
            frame,
            subscription_id,
            captured_generation,
            subscriptions,
            writer,
        }
    }

    fn is_stale(&self) -> bool {
        !self.subscriptions.contains(&self.subscription_id)
            || self.subscriptions.current_generation() != self.captured_generation
    }

    pub async fn ack(&self) -> StompResult<()> {
        self.ack_or_nack(Command::Ack).await
    }

    pub async fn nack(&self) -> StompResult<()> {
        self.ack_or_nack(Command::Nack).await
    }

    async fn ack_or_nack(&self, command: Command) -> StompResult<()> {
        if self.is_stale() {
            tracing::debug!(
                subscription = %self.subscription_id,
                "connection changed since message was received, suppressing ack/nack"
            );
            return Ok(());
        }
        let Some(ack_id) = self.frame.get_header("ack") else {
            tracing::debug!(subscription = %self.subscription_id, "message has no ack header, nothing to acknowledge");
            return Ok(());
        };
        let frame = Frame::new(command)
            .header("id", ack_id.to_string())
            .header("subscription", self.subscription_id.clone());
        (self.writer)(frame).await
    }
}

/// Runs a subscription's handler against a delivered MESSAGE. For an
/// auto-managed subscription this sends the resulting ACK/NACK itself;
/// for a manual-ack subscription it hands the handler an
/// [`AckableMessageFrame`] stamped with the generation in effect right
/// now, and the ack/nack (if any) happens whenever the handler calls it.
pub async fn dispatch(
    subscription: &Subscription,
    message: Frame,
    subscriptions: Arc<ActiveSubscriptions>,
    writer: AckWriter,
) {
    match &subscription.handler {
        HandlerKind::Auto(handler) => {
            let result = handler(message.clone()).await;

            if !subscription.ack_mode.requires_ack() {
                return;
            }
            let Some(ack_id) = message.get_header("ack") else {
                tracing::debug!(subscription = %subscription.id, "message has no ack header, nothing to acknowledge");
                return;
            };

            let frame = match &result {
                Ok(()) => Frame::new(Command::Ack)
                    .header("id", ack_id.to_string())
                    .header("subscription", subscription.id.clone()),
                Err(err) => {
                    tracing::warn!(subscription = %subscription.id, error = %err, "handler failed, sending NACK");
                    if let Some(callback) = &subscription.on_suppressed_exception {
                        callback(err, &message);
                    }
                    Frame::new(Command::Nack)
                        .header("id", ack_id.to_string())
                        .header("subscription", subscription.id.clone())
                }
            };
            if let Err(err) = writer(frame).await {
                tracing::warn!(subscription = %subscription.id, error = %err, "failed to write ack/nack");
            }
        }
        HandlerKind::Manual(handler) => {
            let captured_generation = subscriptions.current_generation();
            let ackable = AckableMessageFrame::new(
                message,
                subscription.id.clone(),
                captured_generation,
                subscriptions,
                writer,
            );
            handler(ackable).await;
        }
    }
}
