//! Media Engine Adapter.
//!
//! The signaling layer never touches sockets, ICE or DTLS itself. Everything
//! media-related goes through the [`MediaEngine`] trait so the coordinator can
//! be driven by the in-process [`LocalEngine`] in production and by a
//! scriptable mock in tests.

mod local;
pub mod types;

pub use local::{EngineStats, LocalEngine, LocalEngineConfig};
pub use types::*;

use common::types::{ConsumerId, ProducerId, RouterId, TransportId};
use std::fmt;
use thiserror::Error;

/// Failures reported by a media engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Router initialization failed: {0}")]
    RouterInit(String),

    #[error("Unknown router: {0}")]
    UnknownRouter(RouterId),

    #[error("Unknown or closed transport: {0}")]
    UnknownTransport(TransportId),

    #[error("Unknown or closed producer: {0}")]
    UnknownProducer(ProducerId),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Consumer capabilities incompatible with producer")]
    Incompatible,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Any closable engine resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaHandle {
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaHandle::Transport(id) => write!(f, "transport:{id}"),
            MediaHandle::Producer(id) => write!(f, "producer:{id}"),
            MediaHandle::Consumer(id) => write!(f, "consumer:{id}"),
        }
    }
}

/// Operations the signaling layer needs from the underlying media engine.
///
/// Every method may be slow (real network setup), so callers await them from
/// their own task and never while holding shared locks.
#[async_trait::async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a router with the given codec set. Called once at startup.
    async fn create_router(&self, media_codecs: Vec<RtpCodecCapability>)
        -> Result<Router, EngineError>;

    /// Allocate a bidirectional transport on `router`.
    ///
    /// The transport holds OS resources until [`close`](Self::close) is called.
    async fn create_transport(&self, router: RouterId) -> Result<Transport, EngineError>;

    /// Whether a receiver with `rtp_capabilities` can consume `producer`.
    ///
    /// Unknown routers or producers simply yield `false`.
    async fn can_consume(
        &self,
        router: RouterId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool;

    /// Start receiving media on `transport`.
    async fn produce(
        &self,
        transport: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Producer, EngineError>;

    /// Start forwarding `producer` to the client behind `transport`.
    async fn consume(
        &self,
        transport: TransportId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
        options: ConsumeOptions,
    ) -> Result<Consumer, EngineError>;

    /// Close a resource. Closing an unknown or already-closed handle is a no-op.
    async fn close(&self, handle: MediaHandle);
}

/// Router codec set used by the service: Opus 48 kHz stereo and VP8 with the
/// configured starting bitrate (kbps).
#[must_use]
pub fn default_media_codecs(video_start_bitrate: u32) -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::opus(),
        RtpCodecCapability::vp8(video_start_bitrate),
    ]
}
