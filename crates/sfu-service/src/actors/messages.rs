//! Message types for actor communication.
//!
//! Inter-actor communication uses `tokio::sync::mpsc`; request-reply uses
//! `tokio::sync::oneshot`. Client-visible payloads (`SignalReply`,
//! `ServerPush`) serialize directly into gateway frames.

use crate::engine::{null_as_default, MediaKind, RtpCapabilities, RtpParameters, Transport};
use crate::errors::SfuError;
use common::types::{ConnectionId, ConsumerId, ProducerId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::connection::ConnectionActorHandle;

/// Payload of a `produce` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub kind: MediaKind,
    /// Absent or `null` parameters are treated like parameters without codecs.
    #[serde(default, deserialize_with = "null_as_default")]
    pub rtp_parameters: RtpParameters,
}

/// Payload of a `consume` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub producer_id: ProducerId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rtp_capabilities: RtpCapabilities,
}

/// A client request handled by a `ConnectionActor`.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalRequest {
    GetRtpCapabilities,
    CreateTransport,
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
}

impl SignalRequest {
    pub const GET_RTP_CAPABILITIES: &'static str = "get-rtp-capabilities";
    pub const CREATE_TRANSPORT: &'static str = "create-transport";
    pub const PRODUCE: &'static str = "produce";
    pub const CONSUME: &'static str = "consume";

    /// Event name on the wire; also the `request` label in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SignalRequest::GetRtpCapabilities => Self::GET_RTP_CAPABILITIES,
            SignalRequest::CreateTransport => Self::CREATE_TRANSPORT,
            SignalRequest::Produce(_) => Self::PRODUCE,
            SignalRequest::Consume(_) => Self::CONSUME,
        }
    }
}

/// Reply to a consume request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedReply {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Successful reply to a [`SignalRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalReply {
    RtpCapabilities(RtpCapabilities),
    TransportCreated(Transport),
    Produced { id: ProducerId },
    Consumed(ConsumedReply),
}

/// Server-initiated notification delivered to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerPush {
    /// Another connection started producing.
    NewProducer { id: ProducerId },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Handle one client request.
    Request {
        request: SignalRequest,
        respond_to: oneshot::Sender<Result<SignalReply, SfuError>>,
    },

    /// Liveness check.
    Ping { respond_to: oneshot::Sender<()> },
}

/// Messages sent to `SignalingHub`.
#[derive(Debug)]
pub enum HubMessage {
    /// A client connected; spawn its `ConnectionActor`.
    Connect {
        connection_id: ConnectionId,
        /// Where pushes for this connection are delivered.
        outbound: mpsc::Sender<ServerPush>,
        respond_to: oneshot::Sender<Result<ConnectionActorHandle, SfuError>>,
    },

    /// Deliver `push` to every connection except `origin`.
    Broadcast {
        origin: ConnectionId,
        push: ServerPush,
    },

    /// A connection actor released its session and exited.
    ConnectionClosed { connection_id: ConnectionId },

    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },

    /// Stop accepting connections and release every session.
    ///
    /// Replies once all connections are gone or `deadline` has passed.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },
}

/// Snapshot of the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    pub connections: usize,
    /// Sessions currently holding a producer.
    pub producers: usize,
    pub accepting_new: bool,
    /// Unix timestamp (seconds) the hub started.
    pub started_at: i64,
    pub mailbox_depth: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_names() {
        assert_eq!(SignalRequest::GetRtpCapabilities.name(), "get-rtp-capabilities");
        assert_eq!(SignalRequest::CreateTransport.name(), "create-transport");
        let consume = SignalRequest::Consume(ConsumeRequest {
            producer_id: ProducerId::new(),
            rtp_capabilities: RtpCapabilities::default(),
        });
        assert_eq!(consume.name(), "consume");
    }

    #[test]
    fn test_produce_request_without_parameters() {
        let request: ProduceRequest = serde_json::from_value(json!({ "kind": "video" })).unwrap();
        assert_eq!(request.kind, MediaKind::Video);
        assert!(request.rtp_parameters.codecs.is_empty());
    }

    #[test]
    fn test_produce_request_requires_kind() {
        let result = serde_json::from_value::<ProduceRequest>(json!({ "rtpParameters": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn test_consume_request_parses_producer_id() {
        let id = ProducerId::new();
        let request: ConsumeRequest = serde_json::from_value(json!({
            "producerId": id.to_string(),
            "rtpCapabilities": { "codecs": [] }
        }))
        .unwrap();
        assert_eq!(request.producer_id, id);
    }

    #[test]
    fn test_produced_reply_shape() {
        let id = ProducerId::new();
        let value = serde_json::to_value(SignalReply::Produced { id }).unwrap();
        assert_eq!(value, json!({ "id": id.to_string() }));
    }

    #[test]
    fn test_consumed_reply_shape() {
        let id = ConsumerId::new();
        let producer_id = ProducerId::new();
        let reply = SignalReply::Consumed(ConsumedReply {
            id,
            producer_id,
            kind: MediaKind::Video,
            rtp_parameters: RtpParameters::default(),
        });

        let value = serde_json::to_value(reply).unwrap();
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["producerId"], producer_id.to_string());
        assert_eq!(value["kind"], "video");
        assert!(value.get("rtpParameters").is_some());
    }

    #[test]
    fn test_new_producer_push_shape() {
        let id = ProducerId::new();
        let value = serde_json::to_value(ServerPush::NewProducer { id }).unwrap();
        assert_eq!(
            value,
            json!({ "event": "new-producer", "data": { "id": id.to_string() } })
        );
    }
}
