//! Pre-configured test data fixtures for signaling tests.
//!
//! Provides:
//! - RTP parameters a browser would send when publishing
//! - Receiver capabilities for consume requests
//! - A ready `SignalingContext` and hub over any engine

use sfu_service::actors::{ActorMetrics, SignalingContext, SignalingHubHandle};
use sfu_service::engine::{
    default_media_codecs, MediaEngine, RtcpFeedback, RtpCapabilities, RtpCodecCapability,
    RtpCodecParameters, RtpParameters,
};
use sfu_service::registry::SessionRegistry;
use std::sync::Arc;

/// VP8 publish parameters: payload type 101, 90 kHz clock.
#[must_use]
pub fn vp8_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "video/VP8".to_string(),
            payload_type: 101,
            clock_rate: 90_000,
            channels: None,
            parameters: Default::default(),
            rtcp_feedback: vec![
                RtcpFeedback {
                    kind: "nack".to_string(),
                    parameter: String::new(),
                },
                RtcpFeedback {
                    kind: "ccm".to_string(),
                    parameter: "fir".to_string(),
                },
            ],
        }],
        encodings: vec![serde_json::json!({ "ssrc": 11_111_111 })],
        ..Default::default()
    }
}

/// Opus publish parameters: payload type 111, 48 kHz stereo.
#[must_use]
pub fn opus_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 111,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: Default::default(),
            rtcp_feedback: vec![],
        }],
        ..Default::default()
    }
}

/// Parameters with an empty codec list.
#[must_use]
pub fn no_codec_rtp_parameters() -> RtpParameters {
    RtpParameters::default()
}

/// Capabilities of a receiver that decodes Opus and VP8.
#[must_use]
pub fn receiver_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: default_media_codecs(1000),
        header_extensions: vec![],
    }
}

/// Capabilities of a receiver that decodes only H264.
#[must_use]
pub fn h264_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![RtpCodecCapability {
            kind: sfu_service::engine::MediaKind::Video,
            mime_type: "video/H264".to_string(),
            preferred_payload_type: Some(102),
            clock_rate: 90_000,
            channels: None,
            parameters: Default::default(),
            rtcp_feedback: vec![],
        }],
        header_extensions: vec![],
    }
}

/// Build a signaling context over `engine` with a fresh router and registry.
pub async fn test_context(engine: Arc<dyn MediaEngine>) -> SignalingContext {
    let router = engine
        .create_router(default_media_codecs(1000))
        .await
        .expect("router creation should succeed");

    SignalingContext {
        engine,
        router: Arc::new(router),
        registry: Arc::new(SessionRegistry::new()),
    }
}

/// Spawn a hub over `engine`. The returned context shares its registry.
pub async fn spawn_hub(engine: Arc<dyn MediaEngine>) -> (SignalingHubHandle, SignalingContext) {
    let (hub, ctx, _metrics) = spawn_hub_with_metrics(engine).await;
    (hub, ctx)
}

/// Like [`spawn_hub`], also returning the metrics the hub's actors record into.
pub async fn spawn_hub_with_metrics(
    engine: Arc<dyn MediaEngine>,
) -> (SignalingHubHandle, SignalingContext, Arc<ActorMetrics>) {
    let ctx = test_context(engine).await;
    let metrics = ActorMetrics::new();
    let hub = SignalingHubHandle::new("sfu-test".to_string(), ctx.clone(), Arc::clone(&metrics));
    (hub, ctx, metrics)
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}
