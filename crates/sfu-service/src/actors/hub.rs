//! `SignalingHub` - singleton supervisor for connection actors.
//!
//! The hub:
//! - Spawns one `ConnectionActor` per accepted connection (child token)
//! - Keeps the directory of live connections and their push queues
//! - Fans `new-producer` out to every connection except the producer's own
//! - Detects connection tasks that died (panic) and releases their sessions
//!
//! # Broadcast
//!
//! Pushes are queued with `try_send`. A full or closed queue is logged and
//! counted; it never delays delivery to the remaining connections.
//!
//! # Graceful Shutdown
//!
//! On `Shutdown` (or cancellation) the hub:
//! 1. Sets `accepting_new = false`
//! 2. Cancels every connection actor
//! 3. Waits for them to release their sessions, up to the deadline
//! 4. Releases whatever is left itself

use crate::errors::SfuError;
use crate::observability::metrics as prom;

use super::connection::{ConnectionActor, ConnectionActorHandle, SignalingContext};
use super::messages::{HubMessage, HubStatus, ServerPush};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::release_session;

use common::types::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the hub mailbox.
const HUB_CHANNEL_BUFFER: usize = 1024;

/// How often the hub sweeps for dead connection tasks while idle.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline used when the hub is cancelled without a `Shutdown` message.
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Handle to the `SignalingHub`.
#[derive(Clone, Debug)]
pub struct SignalingHubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
}

impl SignalingHubHandle {
    /// Spawn the hub and return a handle to it.
    #[must_use]
    pub fn new(hub_id: String, ctx: SignalingContext, metrics: Arc<ActorMetrics>) -> Self {
        let (handle, _task) = SignalingHub::spawn(hub_id, ctx, metrics, CancellationToken::new());
        handle
    }

    /// Accept a connection: register its session and spawn its actor.
    ///
    /// `outbound` receives the connection's push notifications.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerPush>,
    ) -> Result<ConnectionActorHandle, SfuError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::Connect {
                connection_id,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_status(&self) -> Result<HubStatus, SfuError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))
    }

    /// Drain all connections and stop the hub.
    ///
    /// Returns once every session is released or `deadline` has passed.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SfuError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(HubMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the hub (and every connection) immediately.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A connection supervised by the hub.
struct ManagedConnection {
    handle: ConnectionActorHandle,
    task_handle: JoinHandle<()>,
    outbound: mpsc::Sender<ServerPush>,
}

/// The `SignalingHub` implementation.
pub struct SignalingHub {
    hub_id: String,
    receiver: mpsc::Receiver<HubMessage>,
    /// Given to connection actors so they can reach the hub.
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
    ctx: SignalingContext,
    connections: HashMap<ConnectionId, ManagedConnection>,
    accepting_new: bool,
    started_at: i64,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SignalingHub {
    /// Spawn the hub under `cancel_token`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        hub_id: String,
        ctx: SignalingContext,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> (SignalingHubHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);

        let hub = Self {
            mailbox: MailboxMonitor::new(ActorType::Hub, &hub_id),
            hub_id,
            receiver,
            sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            ctx,
            connections: HashMap::new(),
            accepting_new: true,
            started_at: chrono::Utc::now().timestamp(),
            metrics,
        };

        let task_handle = tokio::spawn(hub.run());

        (
            SignalingHubHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "sfu.actor.hub", fields(hub_id = %self.hub_id))]
    async fn run(mut self) {
        info!(
            target: "sfu.actor.hub",
            hub_id = %self.hub_id,
            "SignalingHub started"
        );

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sfu.actor.hub",
                        hub_id = %self.hub_id,
                        "SignalingHub received cancellation signal"
                    );
                    self.drain_connections(DEFAULT_SHUTDOWN_DEADLINE).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    // The hub holds a sender itself, so the channel never closes.
                    let Some(message) = msg else { break };

                    self.mailbox.record_enqueue();
                    let should_exit = self.handle_message(message).await;
                    self.mailbox.record_dequeue();
                    prom::set_actor_mailbox_depth(
                        ActorType::Hub.as_str(),
                        self.sender.max_capacity() - self.sender.capacity(),
                    );

                    if should_exit {
                        break;
                    }
                }

                _ = health_check.tick() => {
                    self.check_connection_health().await;
                }
            }
        }

        info!(
            target: "sfu.actor.hub",
            hub_id = %self.hub_id,
            connections_remaining = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SignalingHub stopped"
        );
    }

    /// Handle a single message. Returns true if the hub should exit.
    async fn handle_message(&mut self, message: HubMessage) -> bool {
        match message {
            HubMessage::Connect {
                connection_id,
                outbound,
                respond_to,
            } => {
                let result = self.connect(connection_id, outbound);
                let _ = respond_to.send(result);
                false
            }

            HubMessage::Broadcast { origin, push } => {
                self.broadcast(origin, &push);
                false
            }

            HubMessage::ConnectionClosed { connection_id } => {
                self.remove_connection(connection_id);
                false
            }

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
                false
            }

            HubMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.drain_connections(deadline).await;
                let _ = respond_to.send(Ok(()));
                self.cancel_token.cancel();
                true
            }
        }
    }

    fn connect(
        &mut self,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerPush>,
    ) -> Result<ConnectionActorHandle, SfuError> {
        if !self.accepting_new {
            return Err(SfuError::Draining);
        }

        if self.connections.contains_key(&connection_id) {
            return Err(SfuError::Internal(format!(
                "duplicate connection id {connection_id}"
            )));
        }

        let (handle, task_handle) = ConnectionActor::spawn(
            connection_id,
            self.ctx.clone(),
            self.sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.connections.insert(
            connection_id,
            ManagedConnection {
                handle: handle.clone(),
                task_handle,
                outbound,
            },
        );
        self.metrics.connection_created();

        info!(
            target: "sfu.actor.hub",
            hub_id = %self.hub_id,
            connection_id = %connection_id,
            connection_count = self.connections.len(),
            "Connection accepted"
        );

        Ok(handle)
    }

    /// Queue `push` for every connection except `origin`.
    fn broadcast(&self, origin: ConnectionId, push: &ServerPush) {
        let mut delivered = 0usize;

        for (connection_id, managed) in &self.connections {
            if *connection_id == origin {
                continue;
            }

            match managed.outbound.try_send(push.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        target: "sfu.actor.hub",
                        connection_id = %connection_id,
                        origin = %origin,
                        "Push queue full, dropping notification"
                    );
                    self.metrics.record_broadcast_dropped();
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        target: "sfu.actor.hub",
                        connection_id = %connection_id,
                        origin = %origin,
                        "Push queue closed, dropping notification"
                    );
                    self.metrics.record_broadcast_dropped();
                }
            }
        }

        debug!(
            target: "sfu.actor.hub",
            origin = %origin,
            delivered,
            "Broadcast fanned out"
        );
    }

    fn remove_connection(&mut self, connection_id: ConnectionId) {
        if self.connections.remove(&connection_id).is_some() {
            self.metrics.connection_closed();
            info!(
                target: "sfu.actor.hub",
                hub_id = %self.hub_id,
                connection_id = %connection_id,
                connection_count = self.connections.len(),
                "Connection removed"
            );
        } else {
            debug!(
                target: "sfu.actor.hub",
                connection_id = %connection_id,
                "Close notification for unknown connection"
            );
        }
    }

    fn get_status(&self) -> HubStatus {
        HubStatus {
            connections: self.connections.len(),
            producers: self.ctx.registry.producer_count(),
            accepting_new: self.accepting_new,
            started_at: self.started_at,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Cancel every connection and wait for their sessions to be released.
    async fn drain_connections(&mut self, deadline: Duration) {
        self.accepting_new = false;

        info!(
            target: "sfu.actor.hub",
            hub_id = %self.hub_id,
            connection_count = self.connections.len(),
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "Draining connections"
        );

        for managed in self.connections.values() {
            managed.handle.disconnect();
        }

        let until = Instant::now() + deadline;
        let connections: Vec<_> = self.connections.drain().collect();

        for (connection_id, mut managed) in connections {
            match tokio::time::timeout_at(until, &mut managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    if join_error.is_panic() {
                        self.metrics.record_panic(ActorType::Connection);
                    }
                    warn!(
                        target: "sfu.actor.hub",
                        connection_id = %connection_id,
                        error = ?join_error,
                        "Connection actor failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sfu.actor.hub",
                        connection_id = %connection_id,
                        "Connection actor shutdown timed out, aborting"
                    );
                    managed.task_handle.abort();
                }
            }

            // No-op unless the actor died before releasing.
            release_session(
                self.ctx.engine.as_ref(),
                &self.ctx.registry,
                connection_id,
                &self.metrics,
            )
            .await;
            self.metrics.connection_closed();
        }

        info!(
            target: "sfu.actor.hub",
            hub_id = %self.hub_id,
            sessions_remaining = self.ctx.registry.len(),
            "Drain complete"
        );
    }

    /// Release sessions of connection tasks that finished without telling the hub.
    async fn check_connection_health(&mut self) {
        let finished: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for connection_id in finished {
            let Some(managed) = self.connections.remove(&connection_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "sfu.actor.hub",
                        connection_id = %connection_id,
                        "Connection actor exited cleanly"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sfu.actor.hub",
                            hub_id = %self.hub_id,
                            connection_id = %connection_id,
                            error = ?join_error,
                            "Connection actor panicked - releasing its session"
                        );
                        self.metrics.record_panic(ActorType::Connection);
                    }
                }
            }

            release_session(
                self.ctx.engine.as_ref(),
                &self.ctx.registry,
                connection_id,
                &self.metrics,
            )
            .await;
            self.metrics.connection_closed();
        }
    }
}
