//! Session teardown shared by connection actors and the hub.
//!
//! A session can be released from two places: the connection actor on
//! disconnect, and the hub when it finds a connection task that died without
//! cleaning up. [`SessionRegistry::remove`] hands the entry to exactly one of
//! them.

use crate::engine::{MediaEngine, MediaHandle};
use crate::observability::metrics as prom;
use crate::registry::SessionRegistry;

use super::metrics::ActorMetrics;

use common::types::ConnectionId;
use tracing::{debug, info};

/// Close `handles` in order.
pub async fn close_handles(engine: &dyn MediaEngine, handles: &[MediaHandle]) {
    for handle in handles {
        engine.close(*handle).await;
        debug!(target: "sfu.actor.session", handle = %handle, "Closed media handle");
    }
}

/// Release every resource held by `connection_id`.
///
/// Producers and consumers are closed before the transport. Returns `false`
/// if the session was already released.
pub async fn release_session(
    engine: &dyn MediaEngine,
    registry: &SessionRegistry,
    connection_id: ConnectionId,
    metrics: &ActorMetrics,
) -> bool {
    let Some(entry) = registry.remove(connection_id) else {
        return false;
    };

    let handles = entry.release_order();
    close_handles(engine, &handles).await;

    metrics.record_session_released();
    prom::set_producers_active(registry.producer_count());

    info!(
        target: "sfu.actor.session",
        connection_id = %connection_id,
        released = handles.len(),
        had_transport = entry.transport.is_some(),
        had_producer = entry.producer.is_some(),
        "Session released"
    );
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{
        default_media_codecs, ConsumeOptions, LocalEngine, LocalEngineConfig, MediaKind,
        RtpCodecParameters, RtpParameters,
    };

    fn vp8() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 101,
                clock_rate: 90_000,
                channels: None,
                parameters: Default::default(),
                rtcp_feedback: vec![],
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_release_session_closes_everything_once() {
        let engine = LocalEngine::new(LocalEngineConfig::loopback());
        let router = engine.create_router(default_media_codecs(1000)).await.unwrap();
        let registry = SessionRegistry::new();
        let metrics = ActorMetrics::new();

        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.register(a);
        registry.register(b);

        let ta = engine.create_transport(router.id).await.unwrap();
        let tb = engine.create_transport(router.id).await.unwrap();
        registry.set_transport(a, ta.id).unwrap();
        registry.set_transport(b, tb.id).unwrap();

        let producer = engine.produce(ta.id, MediaKind::Video, vp8()).await.unwrap();
        registry.set_producer(a, producer.id).unwrap();
        let consumer = engine
            .consume(
                tb.id,
                producer.id,
                &router.rtp_capabilities,
                ConsumeOptions::default(),
            )
            .await
            .unwrap();
        registry.set_consumer(b, consumer.id).unwrap();

        assert!(release_session(&engine, &registry, a, &metrics).await);
        assert!(!release_session(&engine, &registry, a, &metrics).await);

        let stats = engine.stats().await;
        assert_eq!(stats.transports, 1);
        assert_eq!(stats.producers, 0);
        // B's consumer went with A's producer
        assert_eq!(stats.consumers, 0);
        assert_eq!(metrics.sessions_released(), 1);
        assert!(registry.contains(b));
    }

    #[tokio::test]
    async fn test_release_unknown_session() {
        let engine = LocalEngine::new(LocalEngineConfig::loopback());
        let registry = SessionRegistry::new();
        let metrics = ActorMetrics::new();

        assert!(!release_session(&engine, &registry, ConnectionId::new(), &metrics).await);
        assert_eq!(metrics.sessions_released(), 0);
    }
}
