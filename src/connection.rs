// ABOUTME: Connection manager for STOMP sessions - connect-attempt loop, reconnect-on-write, liveness tracking
// ABOUTME: At most one active transport exists at a time; everything above this layer only ever sees its public API

use crate::client::error::{StompError, StompResult};
use crate::frame::{Command, Frame};
use crate::transport::{ConnectOptions, ServerAddr, SslMode, Transport, TransportWriter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Shared, monotonically increasing counter bumped once per successful
/// CONNECTED. Subscriptions capture the value in effect when they were
/// created so acks minted against a since-replaced connection can be
/// recognized as stale and dropped instead of confusing the new broker
/// session.
pub type Generation = Arc<AtomicU64>;

/// Parameters for one candidate broker endpoint, independent of which
/// transport eventually connects to it.
#[derive(Debug, Clone)]
pub struct ConnectionParameters {
    pub servers: Vec<ServerAddr>,
    pub login: String,
    pub passcode: String,
    pub virtual_host: String,
    /// Client-desired (send, receive) heartbeat interval in milliseconds.
    pub heartbeat: (u64, u64),
    pub connect_retry_attempts: usize,
    pub connect_retry_interval: Duration,
    pub connect_timeout: Duration,
    pub read_max_chunk_size: usize,
    pub ssl: SslMode,
    pub strict_unknown_commands: bool,
}

/// The write half of the active connection plus write-path bookkeeping.
struct WriterSlot<T: Transport> {
    writer: T::Writer,
    last_write_time: Instant,
}

/// Heartbeat intervals negotiated with the broker, plus read-path
/// liveness bookkeeping. Kept apart from [`WriterSlot`] so that updating
/// `last_read_time` from a completed read never needs the writer lock.
struct ConnectionMeta {
    effective_send_interval: Option<Duration>,
    effective_receive_interval: Option<Duration>,
    last_read_time: Instant,
}

/// Owns at most one active connection and the logic to (re)establish it.
/// Grounded on this crate's existing `Connection`/`KeepAliveManager` pair:
/// `Connection` for the read/write frame loop, `KeepAliveManager` for the
/// failure-counting, status-reporting shape carried over into
/// [`Self::is_alive`].
///
/// The read half and the write half of a connection are held under
/// *independent* locks (`reader`, `writer`). The listener loop checks the
/// reader out with [`Self::take_reader`] and owns it outright for the
/// life of the connection, so a read parked waiting for the next frame
/// from an idle broker never holds a lock a concurrent `send`,
/// `subscribe`, ack/nack, or heartbeat write is waiting on.
pub struct ConnectionManager<T: Transport> {
    params: ConnectionParameters,
    servers: Mutex<VecDeque<ServerAddr>>,
    writer: Mutex<Option<WriterSlot<T>>>,
    reader: Mutex<Option<T::Reader>>,
    meta: StdMutex<Option<ConnectionMeta>>,
    generation: Generation,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(params: ConnectionParameters) -> Self {
        let servers = params.servers.clone().into_iter().collect();
        Self {
            params,
            servers: Mutex::new(servers),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            meta: StdMutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generation_handle(&self) -> Generation {
        Arc::clone(&self.generation)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// `now - last_read_time <= effective_receive_interval * tolerance_factor`.
    /// `tolerance_factor` is fixed at 2 (see design doc) rather than made
    /// configurable. Reads straight from the shared `meta` lock, which the
    /// listener updates after every frame it reads - never from the
    /// `reader` lock itself, which the listener can hold parked for an
    /// entire idle period.
    pub async fn is_alive(&self) -> bool {
        const TOLERANCE_FACTOR: u32 = 2;
        let Some(meta) = self.meta.lock().expect("connection meta mutex poisoned").as_ref().map(
            |m| (m.last_read_time, m.effective_receive_interval),
        ) else {
            return false;
        };
        let (last_read_time, receive_interval) = meta;
        match receive_interval {
            None => true,
            Some(interval) => last_read_time.elapsed() <= interval * TOLERANCE_FACTOR,
        }
    }

    /// Runs the connect-attempt loop: tries every server in order, rotating
    /// a failed server to the back of the queue so the next pass tries a
    /// different server first. Sleeps `connect_retry_interval * pass_index`
    /// between passes (linear backoff). On success, publishes a fresh
    /// reader/writer pair and bumps the generation counter.
    pub async fn connect(&self) -> StompResult<()> {
        let mut issues = Vec::new();

        for pass in 0..self.params.connect_retry_attempts.max(1) {
            if pass > 0 {
                tokio::time::sleep(self.params.connect_retry_interval * pass as u32).await;
            }

            let server_count = self.servers.lock().await.len();
            for _ in 0..server_count {
                let addr = {
                    let mut servers = self.servers.lock().await;
                    let Some(addr) = servers.pop_front() else {
                        break;
                    };
                    servers.push_back(addr.clone());
                    addr
                };

                match self.try_connect(&addr).await {
                    Ok((reader, writer, effective_send_interval, effective_receive_interval)) => {
                        let now = Instant::now();
                        *self.writer.lock().await = Some(WriterSlot { writer, last_write_time: now });
                        *self.reader.lock().await = Some(reader);
                        *self.meta.lock().expect("connection meta mutex poisoned") = Some(ConnectionMeta {
                            effective_send_interval,
                            effective_receive_interval,
                            last_read_time: now,
                        });
                        self.generation.fetch_add(1, Ordering::SeqCst);
                        return Ok(());
                    }
                    Err(err) => {
                        tracing::warn!(server = %addr, error = %err, "connect attempt failed");
                        issues.push((addr, err.to_string()));
                    }
                }
            }
        }

        Err(StompError::FailedAllConnectAttempts { issues })
    }

    #[allow(clippy::type_complexity)]
    async fn try_connect(
        &self,
        addr: &ServerAddr,
    ) -> StompResult<(T::Reader, T::Writer, Option<Duration>, Option<Duration>)> {
        let options = ConnectOptions {
            timeout: self.params.connect_timeout,
            read_max_chunk_size: self.params.read_max_chunk_size,
            ssl: self.params.ssl.clone(),
            strict_unknown_commands: self.params.strict_unknown_commands,
        };
        let mut transport = T::connect(addr, &options).await.map_err(StompError::ConnectionLost)?;

        let connect_frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.params.virtual_host.clone())
            .header("login", self.params.login.clone())
            .header("passcode", self.params.passcode.clone())
            .header(
                "heart-beat",
                format!("{},{}", self.params.heartbeat.0, self.params.heartbeat.1),
            );

        transport
            .write_frame(&connect_frame)
            .await
            .map_err(StompError::ConnectionLost)?;

        let connected = timeout(self.params.connect_timeout, transport.read_frame())
            .await
            .map_err(|_| StompError::ConnectionConfirmationTimeout)?
            .map_err(StompError::ConnectionLost)?;

        let Frame::Command { command: Command::Connected, headers, .. } = connected else {
            transport.close().await;
            return Err(StompError::ProtocolError(
                "expected CONNECTED as the first frame".to_string(),
            ));
        };

        let version = headers.get("version").unwrap_or_default();
        if version != "1.2" {
            transport.close().await;
            return Err(StompError::UnsupportedProtocolVersion(version.to_string()));
        }

        let (server_x, server_y) = parse_heart_beat(headers.get("heart-beat").unwrap_or("0,0"));
        let (client_x, client_y) = self.params.heartbeat;
        let effective_send_interval = effective_interval(client_x, server_y);
        let effective_receive_interval = effective_interval(client_y, server_x);

        let (reader, writer) = transport.split();
        Ok((reader, writer, effective_send_interval, effective_receive_interval))
    }

    /// Closes the active connection, if any, recording `reason` for diagnostics.
    pub async fn clear_active_connection_state(&self, reason: &str) {
        let writer_slot = self.writer.lock().await.take();
        let _ = self.reader.lock().await.take();
        *self.meta.lock().expect("connection meta mutex poisoned") = None;

        if let Some(mut slot) = writer_slot {
            tracing::debug!(reason, "clearing active connection state");
            slot.writer.close().await;
        }
    }

    /// Writes `frame` on the current connection, reconnecting and retrying
    /// once if the write fails. Used by resubscribe and by ack/nack, which
    /// must not silently vanish just because the broker cycled.
    pub async fn write_frame_reconnecting(&self, frame: &Frame) -> StompResult<()> {
        if self.try_write(frame).await.is_ok() {
            return Ok(());
        }
        self.clear_active_connection_state("write failed").await;
        self.connect().await?;
        self.try_write(frame).await
    }

    /// Writes `frame` only if a live connection exists; drops it silently
    /// otherwise. Used for UNSUBSCRIBE/ACK/NACK, where resurrecting a
    /// connection just to deliver a cleanup frame isn't worth it.
    pub async fn maybe_write_frame(&self, frame: &Frame) {
        if let Err(err) = self.try_write(frame).await {
            tracing::debug!(error = %err, "dropping frame, no active connection");
        }
    }

    async fn try_write(&self, frame: &Frame) -> StompResult<()> {
        let mut guard = self.writer.lock().await;
        let Some(slot) = guard.as_mut() else {
            return Err(StompError::InvalidState("not connected".to_string()));
        };
        slot.writer.write_frame(frame).await.map_err(StompError::ConnectionLost)?;
        slot.last_write_time = Instant::now();
        Ok(())
    }

    /// Writes a bare heartbeat if a live connection exists. Called from
    /// the heartbeat sender task; failures just mark the connection dead
    /// for the next write-with-reconnect to pick up.
    pub async fn maybe_write_heartbeat(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(slot) = guard.as_mut() {
            if let Err(err) = slot.writer.write_heartbeat().await {
                tracing::debug!(error = %err, "heartbeat write failed");
            } else {
                slot.last_write_time = Instant::now();
            }
        }
    }

    pub async fn time_since_last_write(&self) -> Option<Duration> {
        self.writer.lock().await.as_ref().map(|s| s.last_write_time.elapsed())
    }

    pub async fn effective_send_interval(&self) -> Option<Duration> {
        self.meta.lock().expect("connection meta mutex poisoned").as_ref().and_then(|m| m.effective_send_interval)
    }

    pub async fn effective_receive_interval(&self) -> Option<Duration> {
        self.meta.lock().expect("connection meta mutex poisoned").as_ref().and_then(|m| m.effective_receive_interval)
    }

    /// Checks out the current connection's read half for the listener
    /// loop to own outright. Returns `None` if there is no active
    /// connection (e.g. called before the first `connect()`, or after a
    /// read failure and before the next reconnect succeeds). The listener
    /// calls this once per connection and then reads directly off the
    /// returned value - never through the manager - so a pending read
    /// never contends with a writer for a shared lock.
    pub async fn take_reader(&self) -> Option<T::Reader> {
        self.reader.lock().await.take()
    }

    /// Records that a frame was just read, for [`Self::is_alive`]. Called
    /// by the listener after every successful read on the reader half it
    /// checked out with [`Self::take_reader`].
    pub fn record_read(&self) {
        if let Some(meta) = self.meta.lock().expect("connection meta mutex poisoned").as_mut() {
            meta.last_read_time = Instant::now();
        }
    }
}

fn parse_heart_beat(value: &str) -> (u64, u64) {
    let mut parts = value.splitn(2, ',');
    let x = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    let y = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    (x, y)
}

/// `max(mine, theirs)`, with `0` on either side disabling that direction
/// entirely, per the STOMP 1.2 heart-beat negotiation rules.
fn effective_interval(mine: u64, theirs: u64) -> Option<Duration> {
    if mine == 0 || theirs == 0 {
        None
    } else {
        Some(Duration::from_millis(mine.max(theirs)))
    }
}
