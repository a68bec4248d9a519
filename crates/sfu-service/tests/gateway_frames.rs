//! Frame handling of the WebSocket gateway.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::{json, Value};
use sfu_service::gateway::protocol::process_frame;
use sfu_test_utils::{spawn_hub, MockEngine, TestPeer};

async fn reply(peer: &TestPeer, text: &str) -> Value {
    let frame = process_frame(peer.handle(), text)
        .await
        .expect("frame should be answered");
    serde_json::from_str(&frame.to_text()).unwrap()
}

#[tokio::test]
async fn test_reply_echoes_id() {
    let (hub, ctx) = spawn_hub(MockEngine::new()).await;
    let peer = TestPeer::connect(&hub).await;

    let value = reply(&peer, r#"{"id": 1, "event": "get-rtp-capabilities"}"#).await;
    assert_eq!(value["id"], 1);
    assert_eq!(
        value["data"],
        serde_json::to_value(&ctx.router.rtp_capabilities).unwrap()
    );

    let value = reply(&peer, r#"{"id": 2, "event": "create-transport"}"#).await;
    assert_eq!(value["id"], 2);
    assert!(value["data"]["iceParameters"]["usernameFragment"].is_string());
    assert!(value["data"]["dtlsParameters"]["fingerprints"].is_array());
}

#[tokio::test]
async fn test_produce_and_consume_over_frames() {
    let (hub, _ctx) = spawn_hub(MockEngine::new()).await;
    let alice = TestPeer::connect(&hub).await;
    let bob = TestPeer::connect(&hub).await;

    reply(&alice, r#"{"id": 1, "event": "create-transport"}"#).await;
    let produce = json!({
        "id": 2,
        "event": "produce",
        "data": {
            "kind": "video",
            "rtpParameters": {
                "codecs": [{ "mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000 }]
            }
        }
    });
    let value = reply(&alice, &produce.to_string()).await;
    let producer_id = value["data"]["id"].as_str().unwrap().to_string();

    reply(&bob, r#"{"id": 1, "event": "create-transport"}"#).await;
    let consume = json!({
        "id": 2,
        "event": "consume",
        "data": { "producerId": producer_id, "rtpCapabilities": { "codecs": [] } }
    });
    let value = reply(&bob, &consume.to_string()).await;
    assert_eq!(value["data"]["producerId"], producer_id.as_str());
    assert_eq!(value["data"]["kind"], "video");
    assert!(value["data"]["id"].is_string());
}

#[tokio::test]
async fn test_error_replies_use_client_messages() {
    let (hub, _ctx) = spawn_hub(MockEngine::new()).await;
    let peer = TestPeer::connect(&hub).await;

    let value = reply(
        &peer,
        r#"{"id": 5, "event": "produce", "data": {"kind": "video", "rtpParameters": {"codecs": []}}}"#,
    )
    .await;
    assert_eq!(value, json!({ "id": 5, "data": { "error": "Missing RTP codecs" } }));

    let value = reply(
        &peer,
        r#"{"id": 6, "event": "produce", "data": {"kind": "video", "rtpParameters": {"codecs": [{"mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000}]}}}"#,
    )
    .await;
    assert_eq!(value["data"]["error"], "Transport not created");

    let value = reply(&peer, r#"{"id": 7, "event": "restart-ice"}"#).await;
    assert_eq!(value["data"]["error"], "Unknown event");

    let value = reply(&peer, r#"{"id": 8, "event": "consume", "data": {}}"#).await;
    assert_eq!(value["data"]["error"], "Invalid request");
}

#[tokio::test]
async fn test_null_codecs_are_missing_codecs() {
    let engine = MockEngine::new();
    let (hub, ctx) = spawn_hub(engine.clone()).await;
    let peer = TestPeer::connect(&hub).await;
    reply(&peer, r#"{"id": 1, "event": "create-transport"}"#).await;

    for (id, frame) in [
        (2, r#"{"id": 2, "event": "produce", "data": {"kind": "video", "rtpParameters": {"codecs": null}}}"#),
        (3, r#"{"id": 3, "event": "produce", "data": {"kind": "audio", "rtpParameters": null}}"#),
    ] {
        let value = reply(&peer, frame).await;
        assert_eq!(value, json!({ "id": id, "data": { "error": "Missing RTP codecs" } }));
    }

    assert_eq!(engine.produce_calls(), 0);
    assert_eq!(ctx.registry.producer(peer.id()), None);
}

#[tokio::test]
async fn test_malformed_frames() {
    let (hub, _ctx) = spawn_hub(MockEngine::new()).await;
    let peer = TestPeer::connect(&hub).await;

    // Not JSON: answered without an id
    let value = reply(&peer, "hello").await;
    assert_eq!(value, json!({ "id": null, "data": { "error": "Invalid request" } }));

    // JSON with an id but no event: answered with that id
    let value = reply(&peer, r#"{"id": 3}"#).await;
    assert_eq!(value, json!({ "id": 3, "data": { "error": "Invalid request" } }));

    // No id and no event: nothing to answer
    assert!(process_frame(peer.handle(), r#"{"data": 1}"#).await.is_none());
}

#[tokio::test]
async fn test_frames_without_id_are_processed_silently() {
    let engine = MockEngine::new();
    let (hub, ctx) = spawn_hub(engine.clone()).await;
    let peer = TestPeer::connect(&hub).await;

    let answer = process_frame(peer.handle(), r#"{"event": "create-transport"}"#).await;
    assert!(answer.is_none());
    assert!(ctx.registry.transport(peer.id()).is_some());
    assert_eq!(engine.create_transport_calls(), 1);
}
