//! `ConnectionActor` - per-connection signaling handler.
//!
//! Each `ConnectionActor`:
//! - Owns exactly one client connection and its `SessionRegistry` entry
//! - Handles that connection's requests strictly one at a time
//! - Asks the hub to announce its new producers to everyone else
//! - Releases every media resource it holds when the connection goes away
//!
//! # Lifecycle
//!
//! 1. Spawned by the hub when the gateway accepts a connection
//! 2. Runs until disconnect (cancellation) or until every handle is dropped
//! 3. Releases the session, then tells the hub it is gone

use crate::engine::{ConsumeOptions, MediaEngine, MediaHandle, Router};
use crate::errors::SfuError;
use crate::observability::metrics as prom;
use crate::registry::SessionRegistry;

use super::messages::{
    ConnectionMessage, ConsumeRequest, ConsumedReply, HubMessage, ProduceRequest, ServerPush,
    SignalReply, SignalRequest,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{close_handles, release_session};

use common::types::ConnectionId;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 64;

/// Everything a connection needs to serve requests.
#[derive(Clone)]
pub struct SignalingContext {
    pub engine: Arc<dyn MediaEngine>,
    /// Created once at startup, read-only afterwards.
    pub router: Arc<Router>,
    pub registry: Arc<SessionRegistry>,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Submit a request and wait for its reply.
    pub async fn request(&self, request: SignalRequest) -> Result<SignalReply, SfuError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionMessage::Request {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))?
    }

    /// Ping the actor to check liveness.
    pub async fn ping(&self) -> Result<(), SfuError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionMessage::Ping { respond_to: tx })
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))
    }

    /// Signal that the client is gone. The actor releases the session and exits.
    pub fn disconnect(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once the connection is disconnected or the hub shuts down.
    pub async fn closed(&self) {
        self.cancel_token.cancelled().await;
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Child of the hub's token.
    cancel_token: CancellationToken,
    ctx: SignalingContext,
    hub: mpsc::Sender<HubMessage>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Register the connection's session and spawn its actor.
    pub fn spawn(
        connection_id: ConnectionId,
        ctx: SignalingContext,
        hub: mpsc::Sender<HubMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        ctx.registry.register(connection_id);

        let actor = Self {
            connection_id,
            receiver,
            cancel_token: cancel_token.clone(),
            ctx,
            hub,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "sfu.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "sfu.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sfu.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                // A request already taken from the mailbox runs to completion
                // before cancellation is observed, so whatever it creates is
                // either stored (and released below) or closed by the request
                // itself.
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            debug!(
                                target: "sfu.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        release_session(
            self.ctx.engine.as_ref(),
            &self.ctx.registry,
            self.connection_id,
            &self.metrics,
        )
        .await;

        // The hub may be draining and not reading; its health sweep notices
        // the finished task if this is dropped.
        if self
            .hub
            .try_send(HubMessage::ConnectionClosed {
                connection_id: self.connection_id,
            })
            .is_err()
        {
            debug!(
                target: "sfu.actor.connection",
                connection_id = %self.connection_id,
                "Hub not reachable for close notification"
            );
        }

        info!(
            target: "sfu.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ConnectionMessage) {
        match message {
            ConnectionMessage::Request {
                request,
                respond_to,
            } => {
                let result = self.handle_request(request).await;
                // Requester may have gone away; the outcome is already recorded.
                let _ = respond_to.send(result);
            }

            ConnectionMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    async fn handle_request(&self, request: SignalRequest) -> Result<SignalReply, SfuError> {
        let name = request.name();
        let start = Instant::now();

        let result = match request {
            SignalRequest::GetRtpCapabilities => Ok(SignalReply::RtpCapabilities(
                self.ctx.router.rtp_capabilities.clone(),
            )),
            SignalRequest::CreateTransport => self.create_transport().await,
            SignalRequest::Produce(req) => self.produce(req).await,
            SignalRequest::Consume(req) => self.consume(req).await,
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_client_error() => "client_error",
            Err(_) => "server_error",
        };
        prom::record_signaling_request(name, outcome, start.elapsed());

        match &result {
            Ok(_) => {
                debug!(
                    target: "sfu.actor.connection",
                    connection_id = %self.connection_id,
                    request = name,
                    "Request handled"
                );
            }
            Err(e) if e.is_client_error() => {
                info!(
                    target: "sfu.actor.connection",
                    connection_id = %self.connection_id,
                    request = name,
                    error = %e,
                    "Request rejected"
                );
            }
            Err(e) => {
                warn!(
                    target: "sfu.actor.connection",
                    connection_id = %self.connection_id,
                    request = name,
                    error = %e,
                    "Request failed"
                );
            }
        }

        result
    }

    async fn create_transport(&self) -> Result<SignalReply, SfuError> {
        let transport = self
            .ctx
            .engine
            .create_transport(self.ctx.router.id)
            .await
            .map_err(|e| SfuError::engine(SignalRequest::CREATE_TRANSPORT, e))?;

        match self.ctx.registry.set_transport(self.connection_id, transport.id) {
            Ok(Some(replaced)) => {
                info!(
                    target: "sfu.actor.connection",
                    connection_id = %self.connection_id,
                    old_transport_id = %replaced.transport,
                    new_transport_id = %transport.id,
                    dependents = replaced.dependents.len(),
                    "Replacing existing transport"
                );
                close_handles(self.ctx.engine.as_ref(), &replaced.release_order()).await;
                prom::set_producers_active(self.ctx.registry.producer_count());
            }
            Ok(None) => {}
            Err(e) => {
                self.ctx
                    .engine
                    .close(MediaHandle::Transport(transport.id))
                    .await;
                return Err(e);
            }
        }

        Ok(SignalReply::TransportCreated(transport))
    }

    async fn produce(&self, req: ProduceRequest) -> Result<SignalReply, SfuError> {
        if req.rtp_parameters.codecs.is_empty() {
            return Err(SfuError::MissingRtpCodecs);
        }

        let transport = self
            .ctx
            .registry
            .transport(self.connection_id)
            .ok_or(SfuError::NoTransport)?;

        let producer = self
            .ctx
            .engine
            .produce(transport, req.kind, req.rtp_parameters)
            .await
            .map_err(|e| SfuError::engine(SignalRequest::PRODUCE, e))?;

        if let Err(e) = self.ctx.registry.set_producer(self.connection_id, producer.id) {
            self.ctx
                .engine
                .close(MediaHandle::Producer(producer.id))
                .await;
            return Err(e);
        }
        prom::set_producers_active(self.ctx.registry.producer_count());

        // Stored above, so anyone told about it can consume it.
        self.announce(ServerPush::NewProducer { id: producer.id })
            .await;

        Ok(SignalReply::Produced { id: producer.id })
    }

    async fn consume(&self, req: ConsumeRequest) -> Result<SignalReply, SfuError> {
        let can_consume = self
            .ctx
            .engine
            .can_consume(self.ctx.router.id, req.producer_id, &req.rtp_capabilities)
            .await;
        if !can_consume {
            return Err(SfuError::CannotConsume);
        }

        let transport = self
            .ctx
            .registry
            .transport(self.connection_id)
            .ok_or(SfuError::NoTransport)?;

        let consumer = self
            .ctx
            .engine
            .consume(
                transport,
                req.producer_id,
                &req.rtp_capabilities,
                ConsumeOptions { paused: false },
            )
            .await
            .map_err(|e| SfuError::engine(SignalRequest::CONSUME, e))?;

        if let Err(e) = self.ctx.registry.set_consumer(self.connection_id, consumer.id) {
            self.ctx
                .engine
                .close(MediaHandle::Consumer(consumer.id))
                .await;
            return Err(e);
        }

        Ok(SignalReply::Consumed(ConsumedReply {
            id: consumer.id,
            producer_id: consumer.producer_id,
            kind: consumer.kind,
            rtp_parameters: consumer.rtp_parameters,
        }))
    }

    /// Hand a push to the hub for every other connection. Never fails the
    /// request that triggered it.
    async fn announce(&self, push: ServerPush) {
        let message = HubMessage::Broadcast {
            origin: self.connection_id,
            push,
        };

        tokio::select! {
            result = self.hub.send(message) => {
                if let Err(e) = result {
                    warn!(
                        target: "sfu.actor.connection",
                        connection_id = %self.connection_id,
                        error = %e,
                        "Hub unavailable, broadcast dropped"
                    );
                    self.metrics.record_broadcast_dropped();
                }
            }
            () = self.cancel_token.cancelled() => {
                debug!(
                    target: "sfu.actor.connection",
                    connection_id = %self.connection_id,
                    "Cancelled while queueing broadcast"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::{
        default_media_codecs, LocalEngine, LocalEngineConfig, MediaKind, RtpCodecParameters,
        RtpParameters,
    };
    use std::time::Duration;

    struct Harness {
        engine: Arc<LocalEngine>,
        ctx: SignalingContext,
        hub_rx: mpsc::Receiver<HubMessage>,
        hub_tx: mpsc::Sender<HubMessage>,
        root: CancellationToken,
        metrics: Arc<ActorMetrics>,
    }

    impl Harness {
        async fn new() -> Self {
            let engine = Arc::new(LocalEngine::new(LocalEngineConfig::loopback()));
            let router = engine.create_router(default_media_codecs(1000)).await.unwrap();
            let (hub_tx, hub_rx) = mpsc::channel(16);
            Self {
                ctx: SignalingContext {
                    engine: engine.clone(),
                    router: Arc::new(router),
                    registry: Arc::new(SessionRegistry::new()),
                },
                engine,
                hub_rx,
                hub_tx,
                root: CancellationToken::new(),
                metrics: ActorMetrics::new(),
            }
        }

        fn spawn(&self) -> (ConnectionActorHandle, JoinHandle<()>) {
            ConnectionActor::spawn(
                ConnectionId::new(),
                self.ctx.clone(),
                self.hub_tx.clone(),
                self.root.child_token(),
                self.metrics.clone(),
            )
        }
    }

    fn produce_video() -> SignalRequest {
        SignalRequest::Produce(ProduceRequest {
            kind: MediaKind::Video,
            rtp_parameters: RtpParameters {
                codecs: vec![RtpCodecParameters {
                    mime_type: "video/VP8".to_string(),
                    payload_type: 101,
                    clock_rate: 90_000,
                    channels: None,
                    parameters: Default::default(),
                    rtcp_feedback: vec![],
                }],
                ..Default::default()
            },
        })
    }

    #[tokio::test]
    async fn test_spawn_registers_session() {
        let h = Harness::new().await;
        let (handle, _task) = h.spawn();

        assert!(h.ctx.registry.contains(handle.connection_id()));
        handle.ping().await.unwrap();
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_get_rtp_capabilities() {
        let h = Harness::new().await;
        let (handle, _task) = h.spawn();

        let reply = handle
            .request(SignalRequest::GetRtpCapabilities)
            .await
            .unwrap();
        assert_eq!(
            reply,
            SignalReply::RtpCapabilities(h.ctx.router.rtp_capabilities.clone())
        );
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_produce_without_transport() {
        let mut h = Harness::new().await;
        let (handle, _task) = h.spawn();

        let result = handle.request(produce_video()).await;
        assert!(matches!(result, Err(SfuError::NoTransport)));
        assert!(h.hub_rx.try_recv().is_err());
        assert_eq!(h.engine.stats().await.producers, 0);
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_produce_missing_codecs_does_not_touch_registry() {
        let h = Harness::new().await;
        let (handle, _task) = h.spawn();
        handle.request(SignalRequest::CreateTransport).await.unwrap();

        let result = handle
            .request(SignalRequest::Produce(ProduceRequest {
                kind: MediaKind::Video,
                rtp_parameters: RtpParameters::default(),
            }))
            .await;

        assert!(matches!(result, Err(SfuError::MissingRtpCodecs)));
        assert!(h.ctx.registry.producer(handle.connection_id()).is_none());
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_produce_stores_then_broadcasts() {
        let mut h = Harness::new().await;
        let (handle, _task) = h.spawn();
        handle.request(SignalRequest::CreateTransport).await.unwrap();

        let reply = handle.request(produce_video()).await.unwrap();
        let SignalReply::Produced { id } = reply else {
            panic!("unexpected reply: {reply:?}");
        };

        assert_eq!(h.ctx.registry.producer(handle.connection_id()), Some(id));
        match h.hub_rx.recv().await.unwrap() {
            HubMessage::Broadcast { origin, push } => {
                assert_eq!(origin, handle.connection_id());
                assert_eq!(push, ServerPush::NewProducer { id });
            }
            other => panic!("unexpected hub message: {other:?}"),
        }
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_repeated_create_transport_closes_previous() {
        let h = Harness::new().await;
        let (handle, _task) = h.spawn();

        handle.request(SignalRequest::CreateTransport).await.unwrap();
        handle.request(produce_video()).await.unwrap();
        let reply = handle.request(SignalRequest::CreateTransport).await.unwrap();
        let SignalReply::TransportCreated(transport) = reply else {
            panic!("unexpected reply: {reply:?}");
        };

        let stats = h.engine.stats().await;
        assert_eq!(stats.transports, 1);
        assert_eq!(stats.producers, 0);
        assert_eq!(
            h.ctx.registry.transport(handle.connection_id()),
            Some(transport.id)
        );
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_consume_unknown_producer() {
        let h = Harness::new().await;
        let (handle, _task) = h.spawn();
        handle.request(SignalRequest::CreateTransport).await.unwrap();

        let result = handle
            .request(SignalRequest::Consume(ConsumeRequest {
                producer_id: common::types::ProducerId::new(),
                rtp_capabilities: h.ctx.router.rtp_capabilities.clone(),
            }))
            .await;

        assert!(matches!(result, Err(SfuError::CannotConsume)));
        assert!(h.ctx.registry.consumer(handle.connection_id()).is_none());
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_consume_other_connections_producer() {
        let h = Harness::new().await;
        let (a, _ta) = h.spawn();
        let (b, _tb) = h.spawn();
        a.request(SignalRequest::CreateTransport).await.unwrap();
        b.request(SignalRequest::CreateTransport).await.unwrap();

        let SignalReply::Produced { id } = a.request(produce_video()).await.unwrap() else {
            panic!("expected producer");
        };

        let reply = b
            .request(SignalRequest::Consume(ConsumeRequest {
                producer_id: id,
                rtp_capabilities: h.ctx.router.rtp_capabilities.clone(),
            }))
            .await
            .unwrap();

        let SignalReply::Consumed(consumed) = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert_eq!(consumed.producer_id, id);
        assert_eq!(consumed.kind, MediaKind::Video);
        assert_eq!(h.ctx.registry.consumer(b.connection_id()), Some(consumed.id));
        h.root.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_releases_session() {
        let mut h = Harness::new().await;
        let (handle, task) = h.spawn();
        handle.request(SignalRequest::CreateTransport).await.unwrap();
        handle.request(produce_video()).await.unwrap();
        // Drain the broadcast
        let _ = h.hub_rx.recv().await.unwrap();

        handle.disconnect();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should exit")
            .unwrap();

        assert!(!h.ctx.registry.contains(handle.connection_id()));
        let stats = h.engine.stats().await;
        assert_eq!(stats.transports, 0);
        assert_eq!(stats.producers, 0);
        assert_eq!(h.metrics.sessions_released(), 1);

        match h.hub_rx.recv().await.unwrap() {
            HubMessage::ConnectionClosed { connection_id } => {
                assert_eq!(connection_id, handle.connection_id());
            }
            other => panic!("unexpected hub message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_after_disconnect_fails() {
        let h = Harness::new().await;
        let (handle, task) = h.spawn();

        handle.disconnect();
        task.await.unwrap();

        let result = handle.request(SignalRequest::GetRtpCapabilities).await;
        assert!(matches!(result, Err(SfuError::Internal(_))));
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_actor() {
        let h = Harness::new().await;
        let (handle, task) = h.spawn();

        h.root.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should exit")
            .unwrap();
        assert!(handle.is_cancelled());
        assert!(h.ctx.registry.is_empty());
    }
}
