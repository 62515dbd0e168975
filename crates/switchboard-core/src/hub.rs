//! The delivery hub.
//!
//! The hub is the single authority over which sessions are live. Membership
//! changes, broadcasts and relayed inbound frames travel through one ordered
//! command queue and are applied by the routing task, which is the only
//! writer of the registry. Targeted delivery runs on the caller's task under
//! the registry's read lock and never waits on a session.
//!
//! Frames relayed from clients use a separate bounded queue. A reader that
//! outpaces the routing task waits on its own connection instead of growing
//! the hub's memory.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::registry::Registry;
use crate::session::{Enqueue, SessionHandle, SessionId};

/// Hub errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The routing task has already been started for this hub.
    #[error("Hub is already running")]
    AlreadyRunning,

    /// The routing task is gone.
    #[error("Hub has stopped")]
    Stopped,
}

/// What the hub does with frames read from a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundPolicy {
    /// Drop them.
    #[default]
    Discard,
    /// Broadcast them to every session, the sender included.
    Broadcast,
    /// Broadcast them to every session except the sender.
    BroadcastOthers,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Handling of inbound frames.
    pub inbound_policy: InboundPolicy,
    /// Relayed frames that may wait for the routing task before readers
    /// are held back.
    pub inbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_policy: InboundPolicy::default(),
            inbound_capacity: 1024,
        }
    }
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered sessions, anonymous ones included.
    pub sessions: usize,
    /// Users with a delivery target.
    pub users: usize,
    /// Sessions evicted for a full outbound queue since start.
    pub evictions: u64,
}

/// Per-recipient outcome of a group delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Users whose session accepted the payload.
    pub delivered: Vec<String>,
    /// Users with no session, or whose session was evicted instead.
    pub offline: Vec<String>,
}

enum Command {
    Register {
        handle: SessionHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        id: SessionId,
        reason: &'static str,
    },
    Broadcast(Bytes),
    Settle(oneshot::Sender<()>),
}

struct Relayed {
    from: SessionId,
    frame: Bytes,
}

struct Intake {
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::Receiver<Relayed>,
}

struct Shared {
    registry: RwLock<Registry>,
    commands: mpsc::UnboundedSender<Command>,
    inbound: mpsc::Sender<Relayed>,
    intake: Mutex<Option<Intake>>,
    config: HubConfig,
    evictions: AtomicU64,
}

/// Handle to a hub. Cloning is cheap; all clones share one registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Shared>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    /// Create a hub. Nothing is routed until [`Hub::run`] or [`Hub::spawn`]
    /// starts the routing task.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (inbound, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let intake = Intake {
            commands: command_rx,
            inbound: inbound_rx,
        };
        Self {
            inner: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                commands,
                inbound,
                intake: Mutex::new(Some(intake)),
                config,
                evictions: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Run the routing task on the current task.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyRunning`] if the routing task was already
    /// started.
    pub async fn run(self) -> Result<(), HubError> {
        let intake = self.take_intake()?;
        self.route(intake).await;
        Ok(())
    }

    /// Spawn the routing task.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyRunning`] if the routing task was already
    /// started.
    pub fn spawn(&self) -> Result<JoinHandle<()>, HubError> {
        let intake = self.take_intake()?;
        let hub = self.clone();
        Ok(tokio::spawn(async move { hub.route(intake).await }))
    }

    fn take_intake(&self) -> Result<Intake, HubError> {
        self.inner.intake.lock().take().ok_or(HubError::AlreadyRunning)
    }

    async fn route(&self, mut intake: Intake) {
        info!("Hub routing started");
        loop {
            tokio::select! {
                biased;

                command = intake.commands.recv() => match command {
                    Some(command) => self.apply(command, &mut intake.inbound),
                    None => break,
                },
                Some(relayed) = intake.inbound.recv() => self.relay(relayed),
            }
        }
    }

    fn relay(&self, relayed: Relayed) {
        match self.inner.config.inbound_policy {
            InboundPolicy::Discard => {}
            InboundPolicy::Broadcast => {
                self.fan_out(&relayed.frame, None);
            }
            InboundPolicy::BroadcastOthers => {
                self.fan_out(&relayed.frame, Some(relayed.from));
            }
        }
    }

    fn apply(&self, command: Command, inbound: &mut mpsc::Receiver<Relayed>) {
        match command {
            Command::Register { handle, ack } => {
                let id = handle.id();
                let user = handle.user_id().to_string();
                let displaced = self.inner.registry.write().insert(handle);
                if let Some(previous) = displaced {
                    debug!(user = %user, session = %id, previous = %previous, "Delivery target replaced");
                }
                debug!(user = %user, session = %id, "Registered");
                let _ = ack.send(());
            }
            Command::Unregister { id, reason } => {
                let removed = self.inner.registry.write().remove(id);
                if let Some(handle) = removed {
                    debug!(user = %handle.user_id(), session = %id, reason, "Unregistered");
                }
            }
            Command::Broadcast(payload) => {
                let delivered = self.fan_out(&payload, None);
                trace!(recipients = delivered, "Broadcast");
            }
            Command::Settle(ack) => {
                // Relays accepted before the settle count as queued before it
                while let Ok(relayed) = inbound.try_recv() {
                    self.relay(relayed);
                }
                let _ = ack.send(());
            }
        }
    }

    /// Queue `payload` on every session but `skip`, then remove the ones
    /// that could not take it. Runs on the routing task only.
    fn fan_out(&self, payload: &Bytes, skip: Option<SessionId>) -> usize {
        let mut delivered = 0;
        let mut unhealthy = Vec::new();

        {
            let registry = self.inner.registry.read();
            for session in registry.sessions() {
                if Some(session.id()) == skip {
                    continue;
                }
                match session.try_enqueue(payload.clone()) {
                    Enqueue::Queued => delivered += 1,
                    Enqueue::Saturated => {
                        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                        warn!(user = %session.user_id(), session = %session.id(), "Evicting slow consumer");
                        unhealthy.push(session.id());
                    }
                    Enqueue::Closed => unhealthy.push(session.id()),
                }
            }
        }

        if !unhealthy.is_empty() {
            let mut registry = self.inner.registry.write();
            for id in unhealthy {
                if let Some(handle) = registry.remove(id) {
                    handle.mark_dead();
                    debug!(user = %handle.user_id(), session = %id, "Removed during broadcast");
                }
            }
        }

        delivered
    }

    fn submit(&self, command: Command) -> Result<(), HubError> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| HubError::Stopped)
    }

    /// Register a session and wait until it is visible to lookups.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the routing task is gone.
    pub async fn register(&self, handle: SessionHandle) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.submit(Command::Register { handle, ack })?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Remove a session. Its queue is closed and its connection shut once
    /// the outbound pump notices. Unknown or already removed ids are
    /// ignored.
    pub fn unregister(&self, id: SessionId) {
        self.unregister_with(id, "requested");
    }

    pub(crate) fn unregister_with(&self, id: SessionId, reason: &'static str) {
        if self.submit(Command::Unregister { id, reason }).is_err() {
            trace!(session = %id, "Unregister after hub stopped");
        }
    }

    /// Queue `payload` for the current session of `user_id`.
    ///
    /// Returns false when the user has no session, or when its queue is full.
    /// In the latter case the session is evicted. Never blocks.
    pub fn send_to_user(&self, user_id: &str, payload: Bytes) -> bool {
        let outcome = {
            let registry = self.inner.registry.read();
            registry
                .session_for(user_id)
                .map(|session| (session.id(), session.try_enqueue(payload)))
        };

        match outcome {
            None => {
                trace!(user = %user_id, "User offline");
                false
            }
            Some((_, Enqueue::Queued)) => true,
            Some((id, Enqueue::Saturated)) => {
                self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                warn!(user = %user_id, session = %id, "Evicting slow consumer");
                self.unregister_with(id, "outbound queue full");
                false
            }
            Some((id, Enqueue::Closed)) => {
                self.unregister_with(id, "session closed");
                false
            }
        }
    }

    /// Deliver one payload to several users, as [`Hub::send_to_user`] does
    /// for each of them.
    pub fn send_to_users<I>(&self, user_ids: I, payload: &Bytes) -> DeliveryReport
    where
        I: IntoIterator<Item = String>,
    {
        let mut report = DeliveryReport::default();
        for user_id in user_ids {
            if self.send_to_user(&user_id, payload.clone()) {
                report.delivered.push(user_id);
            } else {
                report.offline.push(user_id);
            }
        }
        report
    }

    /// Queue `payload` for every registered session.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the routing task is gone.
    pub fn broadcast(&self, payload: Bytes) -> Result<(), HubError> {
        self.submit(Command::Broadcast(payload))
    }

    /// Hand a client frame to the routing task, waiting while the relay
    /// queue is full.
    pub(crate) async fn relay_inbound(&self, from: SessionId, frame: Bytes) {
        if self.inner.config.inbound_policy == InboundPolicy::Discard {
            return;
        }
        if self.inner.inbound.send(Relayed { from, frame }).await.is_err() {
            trace!(session = %from, "Inbound frame after hub stopped");
        }
    }

    /// Wait until every command queued before this call has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the routing task is gone.
    pub async fn settle(&self) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.submit(Command::Settle(ack))?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Whether `user_id` currently has a delivery target.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.registry.read().session_for(user_id).is_some()
    }

    /// Users that currently have a delivery target.
    #[must_use]
    pub fn online_users(&self) -> Vec<String> {
        self.inner
            .registry
            .read()
            .user_ids()
            .map(str::to_string)
            .collect()
    }

    /// Whether a session is still registered.
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.registry.read().contains(id)
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        let registry = self.inner.registry.read();
        HubStats {
            sessions: registry.len(),
            users: registry.user_count(),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }
}
