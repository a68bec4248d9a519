//! JSON frame format spoken over the WebSocket.
//!
//! ```text
//! client -> server   {"id": 7, "event": "produce", "data": {...}}
//! server -> client   {"id": 7, "data": {...}}            reply
//!                    {"id": 7, "data": {"error": "..."}} error reply
//!                    {"event": "new-producer", "data": {"id": "..."}}
//! ```
//!
//! Frames without an `id` are processed but not answered. A frame that is not
//! valid JSON at all is answered with `"id": null`.

use crate::actors::{ConnectionActorHandle, ServerPush, SignalReply, SignalRequest};
use crate::errors::SfuError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// A request frame from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub id: Option<u64>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A reply frame to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyFrame {
    pub id: Option<u64>,
    pub data: Value,
}

impl ReplyFrame {
    #[must_use]
    pub fn from_result(id: Option<u64>, result: &Result<SignalReply, SfuError>) -> Self {
        let data = match result {
            Ok(reply) => serde_json::to_value(reply)
                .unwrap_or_else(|_| json!({ "error": "An internal error occurred" })),
            Err(e) => json!({ "error": e.client_message() }),
        };
        Self { id, data }
    }

    #[must_use]
    pub fn error(id: Option<u64>, error: &SfuError) -> Self {
        Self {
            id,
            data: json!({ "error": error.client_message() }),
        }
    }

    /// Serialize to the text sent on the socket.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"id":null,"data":{"error":"An internal error occurred"}}"#.to_string()
        })
    }
}

/// Serialize a push to the text sent on the socket.
pub fn push_text(push: &ServerPush) -> Result<String, SfuError> {
    serde_json::to_string(push).map_err(|e| SfuError::Internal(format!("push encode failed: {e}")))
}

/// Turn an event name and its payload into a typed request.
pub fn parse_request(event: &str, data: Value) -> Result<SignalRequest, SfuError> {
    match event {
        SignalRequest::GET_RTP_CAPABILITIES => Ok(SignalRequest::GetRtpCapabilities),
        SignalRequest::CREATE_TRANSPORT => Ok(SignalRequest::CreateTransport),
        SignalRequest::PRODUCE => serde_json::from_value(data)
            .map(SignalRequest::Produce)
            .map_err(|e| SfuError::InvalidRequest(format!("produce: {e}"))),
        SignalRequest::CONSUME => serde_json::from_value(data)
            .map(SignalRequest::Consume)
            .map_err(|e| SfuError::InvalidRequest(format!("consume: {e}"))),
        other => Err(SfuError::UnknownEvent(other.to_string())),
    }
}

/// Handle one text frame from `connection` and return the reply to send, if any.
pub async fn process_frame(connection: &ConnectionActorHandle, text: &str) -> Option<ReplyFrame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            let error = SfuError::InvalidRequest(format!("frame is not JSON: {e}"));
            warn!(
                target: "sfu.gateway",
                connection_id = %connection.connection_id(),
                error = %error,
                "Rejected frame"
            );
            return Some(ReplyFrame::error(None, &error));
        }
    };

    // Recover the id first so a frame with a bad shape still gets its error reply.
    let id = value.get("id").and_then(Value::as_u64);

    let frame: ClientFrame = match serde_json::from_value(value) {
        Ok(frame) => frame,
        Err(e) => {
            let error = SfuError::InvalidRequest(format!("bad frame: {e}"));
            warn!(
                target: "sfu.gateway",
                connection_id = %connection.connection_id(),
                error = %error,
                "Rejected frame"
            );
            return id.map(|id| ReplyFrame::error(Some(id), &error));
        }
    };

    let result = match parse_request(&frame.event, frame.data) {
        Ok(request) => connection.request(request).await,
        Err(e) => {
            debug!(
                target: "sfu.gateway",
                connection_id = %connection.connection_id(),
                event = %frame.event,
                error = %e,
                "Rejected request"
            );
            Err(e)
        }
    };

    frame.id.map(|id| ReplyFrame::from_result(Some(id), &result))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use common::types::ProducerId;

    #[test]
    fn test_parse_simple_events() {
        assert_eq!(
            parse_request("get-rtp-capabilities", Value::Null).unwrap(),
            SignalRequest::GetRtpCapabilities
        );
        // Payload is ignored for requests that take none
        assert_eq!(
            parse_request("create-transport", json!({ "whatever": 1 })).unwrap(),
            SignalRequest::CreateTransport
        );
    }

    #[test]
    fn test_parse_produce() {
        let request = parse_request(
            "produce",
            json!({
                "kind": "video",
                "rtpParameters": {
                    "codecs": [{ "mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000 }]
                }
            }),
        )
        .unwrap();

        match request {
            SignalRequest::Produce(produce) => {
                assert_eq!(produce.rtp_parameters.codecs.len(), 1);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_parse_produce_null_codecs_means_no_codecs() {
        for data in [
            json!({ "kind": "video", "rtpParameters": { "codecs": null } }),
            json!({ "kind": "audio", "rtpParameters": null }),
            json!({ "kind": "audio" }),
        ] {
            match parse_request("produce", data.clone()).unwrap() {
                SignalRequest::Produce(produce) => {
                    assert!(produce.rtp_parameters.codecs.is_empty(), "{data}");
                }
                other => panic!("unexpected request: {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_consume_null_capabilities() {
        let producer_id = ProducerId::new();
        let request = parse_request(
            "consume",
            json!({ "producerId": producer_id, "rtpCapabilities": null }),
        )
        .unwrap();

        match request {
            SignalRequest::Consume(consume) => {
                assert_eq!(consume.producer_id, producer_id);
                assert!(consume.rtp_capabilities.codecs.is_empty());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_parse_bad_payload_is_invalid_request() {
        let err = parse_request("produce", Value::Null).unwrap_err();
        assert!(matches!(err, SfuError::InvalidRequest(_)));
        assert_eq!(err.client_message(), "Invalid request");

        let err = parse_request("consume", json!({ "producerId": "not-a-uuid" })).unwrap_err();
        assert!(matches!(err, SfuError::InvalidRequest(_)));
    }

    #[test]
    fn test_parse_unknown_event() {
        let err = parse_request("connect-transport", json!({})).unwrap_err();
        assert!(matches!(err, SfuError::UnknownEvent(ref e) if e == "connect-transport"));
        assert_eq!(err.client_message(), "Unknown event");
    }

    #[test]
    fn test_client_frame_defaults() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"event": "create-transport"}"#).unwrap();
        assert_eq!(frame.id, None);
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn test_reply_frame_success() {
        let id = ProducerId::new();
        let frame = ReplyFrame::from_result(Some(3), &Ok(SignalReply::Produced { id }));
        let value: Value = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(value, json!({ "id": 3, "data": { "id": id.to_string() } }));
    }

    #[test]
    fn test_reply_frame_error_uses_client_message() {
        let frame = ReplyFrame::from_result(Some(4), &Err(SfuError::NoTransport));
        let value: Value = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(
            value,
            json!({ "id": 4, "data": { "error": "Transport not created" } })
        );
    }

    #[test]
    fn test_push_text() {
        let id = ProducerId::new();
        let text = push_text(&ServerPush::NewProducer { id }).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "new-producer");
        assert_eq!(value["data"]["id"], id.to_string());
    }
}
