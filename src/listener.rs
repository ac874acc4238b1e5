// ABOUTME: The listener loop - reads frames off the active connection and routes them by command
// ABOUTME: Owns reconnect-and-resubscribe: a read failure here is what drives the connection manager's recovery path

use crate::client::error::StompResult;
use crate::connection::ConnectionManager;
use crate::frame::{Command, Frame};
use crate::subscription::{dispatch, ActiveSubscriptions};
use crate::transport::{Transport, TransportReader};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Tracks callers waiting on a RECEIPT for a given `receipt-id`, e.g. a
/// graceful DISCONNECT awaiting its confirmation.
#[derive(Default)]
pub struct ReceiptWaiters {
    inner: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl ReceiptWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, receipt_id: impl Into<String>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().expect("receipt waiters mutex poisoned").insert(receipt_id.into(), tx);
        rx
    }

    fn resolve(&self, receipt_id: &str) {
        if let Some(tx) = self.inner.lock().expect("receipt waiters mutex poisoned").remove(receipt_id) {
            let _ = tx.send(());
        }
    }
}

pub type ErrorFrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;
pub type HeartbeatCallback = Arc<dyn Fn() + Send + Sync>;

pub struct ListenerContext<T: Transport> {
    pub manager: Arc<ConnectionManager<T>>,
    pub subscriptions: Arc<ActiveSubscriptions>,
    pub receipts: Arc<ReceiptWaiters>,
    pub on_error_frame: Option<ErrorFrameCallback>,
    pub on_heartbeat: Option<HeartbeatCallback>,
}

/// Runs until `cancel` fires or reconnection is exhausted. The latter is
/// not expected in normal operation - the caller sets `cancel` on
/// `disconnect` well before the connect loop would give up - but if it
/// does happen the listener just stops; the client facade surfaces it
/// through the next operation that touches the connection manager.
///
/// The listener checks out the connection's read half with
/// [`ConnectionManager::take_reader`] and reads directly off it rather
/// than through the manager, so a read parked waiting for the next frame
/// from an idle broker never holds a lock a concurrent writer needs. A
/// fresh reader is checked out again after every reconnect, including the
/// ones triggered mid-stream by [`handle_frame`].
pub async fn run<T>(ctx: ListenerContext<T>, cancel: CancellationToken)
where
    T: Transport + 'static,
{
    let Some(mut reader) = ctx.manager.take_reader().await else {
        tracing::error!("listener starting with no active connection, stopping");
        return;
    };

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = reader.read_frame() => frame,
        };

        match frame {
            Ok(frame) => {
                ctx.manager.record_read();
                if handle_frame(&ctx, frame).await {
                    match ctx.manager.take_reader().await {
                        Some(r) => reader = r,
                        None => return,
                    }
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "listener read failed, reconnecting");
                ctx.manager.clear_active_connection_state("read failed").await;
                if let Err(err) = ctx.manager.connect().await {
                    tracing::error!(error = %err, "reconnect exhausted, listener stopping");
                    return;
                }
                resubscribe(&ctx).await;
                match ctx.manager.take_reader().await {
                    Some(r) => reader = r,
                    None => return,
                }
            }
        }
    }
}

/// Dispatches one inbound frame. Returns `true` if handling it caused a
/// reconnect, so the caller knows to check out a fresh reader.
async fn handle_frame<T: Transport>(ctx: &ListenerContext<T>, frame: Frame) -> bool {
    match frame.command() {
        None => {
            if let Some(cb) = &ctx.on_heartbeat {
                cb();
            }
            false
        }
        Some(Command::Message) => {
            handle_message(ctx, frame).await;
            false
        }
        Some(Command::Error) => {
            if let Some(cb) = &ctx.on_error_frame {
                cb(frame);
            } else {
                tracing::warn!(?frame, "received ERROR frame with no handler installed");
            }
            false
        }
        Some(Command::Receipt) => {
            if let Some(id) = frame.get_header("receipt-id") {
                ctx.receipts.resolve(id);
            }
            false
        }
        Some(Command::Connected) => {
            tracing::warn!("received unexpected CONNECTED mid-stream, reconnecting");
            ctx.manager.clear_active_connection_state("unexpected CONNECTED").await;
            if ctx.manager.connect().await.is_ok() {
                resubscribe(ctx).await;
            }
            true
        }
        Some(other) => {
            tracing::debug!(command = %other, "ignoring frame with no client-side meaning");
            false
        }
    }
}

async fn handle_message<T: Transport>(ctx: &ListenerContext<T>, frame: Frame) {
    let Some(subscription_id) = frame.get_header("subscription").map(str::to_string) else {
        tracing::debug!("MESSAGE frame has no subscription header, discarding");
        return;
    };
    let Some(subscription) = ctx.subscriptions.get(&subscription_id) else {
        tracing::debug!(subscription = %subscription_id, "no active subscription for message, discarding");
        return;
    };

    let manager = Arc::clone(&ctx.manager);
    let writer: crate::subscription::AckWriter = Arc::new(move |ack_or_nack: Frame| {
        let manager = Arc::clone(&manager);
        Box::pin(async move {
            manager.maybe_write_frame(&ack_or_nack).await;
            StompResult::Ok(())
        })
    });

    dispatch(&subscription, frame, Arc::clone(&ctx.subscriptions), writer).await;
}

async fn resubscribe<T: Transport>(ctx: &ListenerContext<T>) {
    for subscription in ctx.subscriptions.all() {
        if let Err(err) = ctx.manager.write_frame_reconnecting(&subscription.subscribe_frame()).await {
            tracing::error!(subscription = %subscription.id(), error = %err, "failed to resubscribe");
        }
    }
}
