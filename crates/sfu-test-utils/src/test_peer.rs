//! A signaling client driven directly against the hub.
//!
//! `TestPeer` skips the WebSocket and talks to its `ConnectionActor` handle,
//! keeping every push it receives so tests can assert on fan-out.

use common::types::{ConnectionId, ProducerId};
use sfu_service::actors::{
    ConsumeRequest, ConnectionActorHandle, ProduceRequest, ServerPush, SignalReply,
    SignalRequest, SignalingHubHandle,
};
use sfu_service::engine::{MediaKind, RtpCapabilities, RtpParameters, Transport};
use sfu_service::errors::SfuError;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::fixtures::vp8_rtp_parameters;

/// Push queue depth for test peers.
const TEST_PUSH_BUFFER: usize = 64;

/// Default wait used by [`TestPeer::next_push`].
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected client.
pub struct TestPeer {
    handle: ConnectionActorHandle,
    pushes: mpsc::Receiver<ServerPush>,
}

impl TestPeer {
    /// Connect a new peer through `hub`.
    pub async fn connect(hub: &SignalingHubHandle) -> Self {
        Self::try_connect(hub).await.expect("connect should succeed")
    }

    /// Connect a new peer, returning the hub's error if refused.
    pub async fn try_connect(hub: &SignalingHubHandle) -> Result<Self, SfuError> {
        let (tx, rx) = mpsc::channel(TEST_PUSH_BUFFER);
        let handle = hub.connect(ConnectionId::new(), tx).await?;
        Ok(Self { handle, pushes: rx })
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    #[must_use]
    pub fn handle(&self) -> &ConnectionActorHandle {
        &self.handle
    }

    pub async fn request(&self, request: SignalRequest) -> Result<SignalReply, SfuError> {
        self.handle.request(request).await
    }

    pub async fn rtp_capabilities(&self) -> RtpCapabilities {
        match self.request(SignalRequest::GetRtpCapabilities).await {
            Ok(SignalReply::RtpCapabilities(caps)) => caps,
            other => panic!("unexpected get-rtp-capabilities reply: {other:?}"),
        }
    }

    pub async fn create_transport(&self) -> Transport {
        match self.request(SignalRequest::CreateTransport).await {
            Ok(SignalReply::TransportCreated(transport)) => transport,
            other => panic!("unexpected create-transport reply: {other:?}"),
        }
    }

    pub async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SfuError> {
        let reply = self
            .request(SignalRequest::Produce(ProduceRequest {
                kind,
                rtp_parameters,
            }))
            .await?;
        match reply {
            SignalReply::Produced { id } => Ok(id),
            other => panic!("unexpected produce reply: {other:?}"),
        }
    }

    /// Publish VP8 video; panics on failure.
    pub async fn produce_video(&self) -> ProducerId {
        self.produce(MediaKind::Video, vp8_rtp_parameters())
            .await
            .expect("produce should succeed")
    }

    pub async fn consume(
        &self,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<SignalReply, SfuError> {
        self.request(SignalRequest::Consume(ConsumeRequest {
            producer_id,
            rtp_capabilities,
        }))
        .await
    }

    /// Wait up to [`PUSH_TIMEOUT`] for the next push.
    pub async fn next_push(&mut self) -> Option<ServerPush> {
        self.next_push_within(PUSH_TIMEOUT).await
    }

    pub async fn next_push_within(&mut self, wait: Duration) -> Option<ServerPush> {
        tokio::time::timeout(wait, self.pushes.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn disconnect(&self) {
        self.handle.disconnect();
    }
}
