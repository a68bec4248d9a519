//! SFU signaling error types.
//!
//! Every error maps to a fixed client-facing message. Engine diagnostics are
//! logged server-side but never sent to clients.

use crate::config::ConfigError;
use crate::engine::EngineError;
use thiserror::Error;

/// SFU signaling error type.
///
/// Client-facing messages:
/// - `NoTransport`: "Transport not created"
/// - `MissingRtpCodecs`: "Missing RTP codecs"
/// - `CannotConsume`: "Cannot consume"
/// - `InvalidRequest`: "Invalid request"
/// - `UnknownEvent`: "Unknown event"
/// - `Engine`: "Failed to create transport" / "Failed to produce" / "Failed to consume"
/// - `Draining`: "Server is shutting down"
/// - `SessionClosed`, `Config`, `Internal`: "An internal error occurred"
#[derive(Debug, Error)]
pub enum SfuError {
    /// Produce/consume before the connection created a transport.
    #[error("Transport not created")]
    NoTransport,

    /// Produce request carried no codecs.
    #[error("Missing RTP codecs")]
    MissingRtpCodecs,

    /// The engine reported the consumer cannot decode the producer (or the
    /// producer does not exist).
    #[error("Cannot consume")]
    CannotConsume,

    /// Malformed client frame.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Client named an event this server does not handle.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The media engine failed while serving a request.
    #[error("Engine error during {request}: {source}")]
    Engine {
        request: &'static str,
        #[source]
        source: EngineError,
    },

    /// The connection's session was released while a request was in flight.
    #[error("Session closed")]
    SessionClosed,

    /// Server is draining (graceful shutdown).
    #[error("Server is draining")]
    Draining,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel failures, lost replies).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SfuError {
    /// Wrap an engine failure with the signaling request it occurred in.
    #[must_use]
    pub fn engine(request: &'static str, source: EngineError) -> Self {
        SfuError::Engine { request, source }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SfuError::NoTransport => "Transport not created".to_string(),
            SfuError::MissingRtpCodecs => "Missing RTP codecs".to_string(),
            SfuError::CannotConsume => "Cannot consume".to_string(),
            SfuError::InvalidRequest(_) => "Invalid request".to_string(),
            SfuError::UnknownEvent(_) => "Unknown event".to_string(),
            SfuError::Engine { request, .. } => match *request {
                "create-transport" => "Failed to create transport".to_string(),
                "produce" => "Failed to produce".to_string(),
                "consume" => "Failed to consume".to_string(),
                _ => "An internal error occurred".to_string(),
            },
            SfuError::Draining => "Server is shutting down".to_string(),
            SfuError::SessionClosed | SfuError::Config(_) | SfuError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Whether the failure was caused by the client (used for log levels and
    /// the `outcome` metric label).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SfuError::NoTransport
                | SfuError::MissingRtpCodecs
                | SfuError::CannotConsume
                | SfuError::InvalidRequest(_)
                | SfuError::UnknownEvent(_)
        )
    }
}

impl From<ConfigError> for SfuError {
    fn from(err: ConfigError) -> Self {
        SfuError::Config(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages() {
        assert_eq!(SfuError::NoTransport.client_message(), "Transport not created");
        assert_eq!(SfuError::MissingRtpCodecs.client_message(), "Missing RTP codecs");
        assert_eq!(SfuError::CannotConsume.client_message(), "Cannot consume");
        assert_eq!(
            SfuError::InvalidRequest("expected object".to_string()).client_message(),
            "Invalid request"
        );
        assert_eq!(
            SfuError::UnknownEvent("resume".to_string()).client_message(),
            "Unknown event"
        );
        assert_eq!(SfuError::Draining.client_message(), "Server is shutting down");
    }

    #[test]
    fn test_engine_errors_map_per_request() {
        let err = SfuError::engine("create-transport", EngineError::Io("bind".to_string()));
        assert_eq!(err.client_message(), "Failed to create transport");

        let err = SfuError::engine("produce", EngineError::UnsupportedCodec("video/H265".into()));
        assert_eq!(err.client_message(), "Failed to produce");

        let err = SfuError::engine("consume", EngineError::Incompatible);
        assert_eq!(err.client_message(), "Failed to consume");
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SfuError::engine(
            "create-transport",
            EngineError::Io("address in use 10.0.0.7:40000".to_string()),
        );
        assert!(!err.client_message().contains("10.0.0.7"));

        let err = SfuError::Internal("channel send failed: closed".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = SfuError::Config("missing bind address".to_string());
        assert!(!err.client_message().contains("bind"));
    }

    #[test]
    fn test_from_config_error() {
        let err: SfuError = ConfigError::InvalidValue {
            name: "SFU_LISTEN_IP".to_string(),
            reason: "'x': invalid IP address syntax".to_string(),
        }
        .into();
        assert!(matches!(err, SfuError::Config(ref msg) if msg.contains("SFU_LISTEN_IP")));
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_is_client_error() {
        assert!(SfuError::NoTransport.is_client_error());
        assert!(SfuError::CannotConsume.is_client_error());
        assert!(SfuError::InvalidRequest(String::new()).is_client_error());
        assert!(!SfuError::Draining.is_client_error());
        assert!(!SfuError::Internal(String::new()).is_client_error());
        assert!(!SfuError::engine("produce", EngineError::Incompatible).is_client_error());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SfuError::engine("consume", EngineError::Incompatible)),
            "Engine error during consume: Consumer capabilities incompatible with producer"
        );
        assert_eq!(
            format!("{}", SfuError::Internal("timeout".to_string())),
            "Internal error: timeout"
        );
    }
}
