//! Client sessions.
//!
//! A session owns one [`Connection`] and a bounded outbound queue. Once
//! admitted it runs two tasks: the inbound pump reads frames and hands them
//! to the hub, the outbound pump drains the queue onto the wire and sends a
//! keepalive probe every `ping_period`. Whichever pump fails first tears the
//! session down; teardown reaches the hub exactly once.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_transport::{Connection, FrameReader, FrameWriter, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::hub::{Hub, HubError};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

/// Process-unique identity of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Queued,
    /// The queue was full and this caller is the one that flagged the
    /// session for eviction.
    Saturated,
    /// The session is already dead or flagged.
    Closed,
}

/// The hub's view of a session.
///
/// The handle owns the only sender of the outbound queue, so dropping it
/// (which is what unregistering does) closes the queue.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    user_id: String,
    outbound: mpsc::Sender<Bytes>,
    alive: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Build a handle around an outbound queue.
    ///
    /// An empty `user_id` makes the session anonymous: it only receives
    /// broadcasts.
    #[must_use]
    pub fn new(user_id: impl Into<String>, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id: SessionId::next(),
            user_id: user_id.into(),
            outbound,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// False once the session has been flagged for eviction.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Queue a frame without waiting.
    pub(crate) fn try_enqueue(&self, frame: Bytes) -> Enqueue {
        if !self.is_alive() {
            return Enqueue::Closed;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Concurrent callers can all see Full; only one of them wins the flag
                if self.alive.swap(false, Ordering::AcqRel) {
                    Enqueue::Saturated
                } else {
                    Enqueue::Closed
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_dead();
                Enqueue::Closed
            }
        }
    }
}

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frames a session may have queued before it is evicted.
    pub outbound_capacity: usize,
    /// Interval between keepalive probes. Must be shorter than the
    /// connection's idle timeout. Zero is raised to one millisecond.
    pub ping_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_period: Duration::from_secs(54),
        }
    }
}

/// Register a connection with the hub and start its pumps.
///
/// Returns once the session is visible to [`Hub::send_to_user`]. From then
/// on the session manages itself and leaves the hub when the connection
/// fails.
///
/// # Errors
///
/// Returns [`HubError::Stopped`] if the hub's routing task is gone.
pub async fn admit(
    hub: &Hub,
    user_id: impl Into<String>,
    connection: Box<dyn Connection>,
    config: &SessionConfig,
) -> Result<SessionId, HubError> {
    let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
    let handle = SessionHandle::new(user_id, tx);
    let id = handle.id();
    let user = handle.user_id().to_string();
    let alive = handle.liveness();
    let remote = connection.remote_addr();

    hub.register(handle).await?;

    let (reader, writer) = connection.split();
    let teardown = Arc::new(Teardown {
        hub: hub.clone(),
        id,
        done: AtomicBool::new(false),
    });
    let (writer_done_tx, writer_done_rx) = oneshot::channel();

    tokio::spawn(outbound_pump(
        writer,
        rx,
        alive,
        config.ping_period.max(MIN_PING_PERIOD),
        Arc::clone(&teardown),
        writer_done_tx,
    ));
    tokio::spawn(inbound_pump(reader, hub.clone(), id, teardown, writer_done_rx));

    info!(session = %id, user = %user, remote = ?remote, "Session admitted");
    Ok(id)
}

/// Unregisters a session the first time either pump gives up.
struct Teardown {
    hub: Hub,
    id: SessionId,
    done: AtomicBool,
}

impl Teardown {
    fn run(&self, reason: &'static str) {
        if !self.done.swap(true, Ordering::AcqRel) {
            debug!(session = %self.id, reason, "Session ending");
            self.hub.unregister_with(self.id, reason);
        }
    }
}

async fn inbound_pump(
    mut reader: Box<dyn FrameReader>,
    hub: Hub,
    id: SessionId,
    teardown: Arc<Teardown>,
    mut writer_done: oneshot::Receiver<()>,
) {
    let reason = loop {
        tokio::select! {
            biased;

            _ = &mut writer_done => break "writer stopped",
            read = reader.read_frame() => match read {
                Ok(frame) => {
                    trace!(session = %id, len = frame.len(), "Inbound frame");
                    hub.relay_inbound(id, frame).await;
                }
                Err(TransportError::ConnectionClosed) => break "peer closed",
                Err(TransportError::IdleTimeout(_)) => break "idle timeout",
                Err(TransportError::FrameTooLarge { size, max }) => {
                    warn!(session = %id, size, max, "Closing session after oversize frame");
                    break "frame too large";
                }
                Err(e) => {
                    debug!(session = %id, error = %e, "Read failed");
                    break "read failed";
                }
            }
        }
    };

    teardown.run(reason);
}

async fn outbound_pump(
    mut writer: Box<dyn FrameWriter>,
    mut queue: mpsc::Receiver<Bytes>,
    alive: Arc<AtomicBool>,
    ping_period: Duration,
    teardown: Arc<Teardown>,
    writer_done: oneshot::Sender<()>,
) {
    let mut keepalive = interval_at(Instant::now() + ping_period, ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            frame = queue.recv() => {
                let Some(frame) = frame else { break "queue closed" };
                if !alive.load(Ordering::Acquire) {
                    break "evicted";
                }
                let mut batch = vec![frame];
                while let Ok(more) = queue.try_recv() {
                    batch.push(more);
                }
                if let Err(e) = writer.write_batch(batch).await {
                    debug!(session = %teardown.id, error = %e, "Write failed");
                    break "write failed";
                }
            }
            _ = keepalive.tick() => {
                if !alive.load(Ordering::Acquire) {
                    break "evicted";
                }
                if let Err(e) = writer.write_ping().await {
                    debug!(session = %teardown.id, error = %e, "Keepalive failed");
                    break "keepalive failed";
                }
            }
        }
    };

    teardown.run(reason);
    drop(writer_done);
    if let Err(e) = writer.close().await {
        trace!(session = %teardown.id, error = %e, "Close frame not sent");
    }
}
