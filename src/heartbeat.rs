// ABOUTME: Two cooperative heartbeat tasks - an outbound sender and a read-progress watchdog
// ABOUTME: Shaped after this crate's KeepAliveManager, but push-based tasks instead of a polled status struct

use crate::connection::ConnectionManager;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(250);

/// Spawns the sender and receiver-watchdog tasks for one connection's
/// lifetime. Both exit as soon as `cancel` fires; the caller (the client
/// lifespan scope) owns cancellation.
pub fn spawn<T>(manager: Arc<ConnectionManager<T>>, cancel: CancellationToken) -> (JoinHandle<()>, JoinHandle<()>)
where
    T: Transport + 'static,
{
    let sender = {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tokio::spawn(async move { sender_loop(manager, cancel).await })
    };
    let receiver = tokio::spawn(async move { receiver_loop(manager, cancel).await });
    (sender, receiver)
}

async fn sender_loop<T: Transport>(manager: Arc<ConnectionManager<T>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(TICK) => {}
        }

        let Some(interval) = manager.effective_send_interval().await else {
            continue;
        };
        let idle = manager.time_since_last_write().await.unwrap_or(Duration::MAX);
        if idle >= interval {
            manager.maybe_write_heartbeat().await;
        }
    }
}

async fn receiver_loop<T: Transport>(manager: Arc<ConnectionManager<T>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(TICK) => {}
        }

        if manager.effective_receive_interval().await.is_none() {
            continue;
        }
        if manager.is_connected().await && !manager.is_alive().await {
            tracing::warn!("no data received within the heartbeat tolerance window, dropping connection");
            manager.clear_active_connection_state("heartbeat timeout").await;
        }
    }
}
