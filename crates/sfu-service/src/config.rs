//! SFU service configuration.
//!
//! Configuration is loaded from environment variables. Every setting has a
//! default, so an empty environment yields a working local configuration.

use crate::engine::LocalEngineConfig;
use common::config::LogFormat;
use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket gateway bind address.
pub const DEFAULT_GATEWAY_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default IP media sockets are bound on.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default `x-google-start-bitrate` for VP8, in kbps.
pub const DEFAULT_VIDEO_START_BITRATE: u32 = 1000;

/// Default time allowed for connections to release on shutdown.
pub const DEFAULT_SHUTDOWN_DEADLINE_SECONDS: u64 = 10;

/// Default SFU instance ID prefix.
pub const DEFAULT_SFU_ID_PREFIX: &str = "sfu";

/// SFU service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket gateway bind address (default: "0.0.0.0:3001").
    pub gateway_bind_address: SocketAddr,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: SocketAddr,

    /// IP the media engine binds transports on.
    pub listen_ip: IpAddr,

    /// IP advertised in ICE candidates, for hosts behind NAT.
    pub announced_ip: Option<IpAddr>,

    /// `x-google-start-bitrate` for the router's VP8 codec.
    pub video_start_bitrate: u32,

    /// Unique identifier for this SFU instance.
    pub sfu_id: String,

    pub log_format: LogFormat,

    /// How long shutdown waits for connections to release their sessions.
    pub shutdown_deadline: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let gateway_bind_address =
            parse_or(vars, "SFU_GATEWAY_BIND_ADDRESS", DEFAULT_GATEWAY_BIND_ADDRESS)?;
        let health_bind_address =
            parse_or(vars, "SFU_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS)?;
        let listen_ip = parse_or(vars, "SFU_LISTEN_IP", DEFAULT_LISTEN_IP)?;

        let announced_ip = match vars.get("SFU_ANNOUNCED_IP") {
            Some(value) if !value.trim().is_empty() => Some(parse("SFU_ANNOUNCED_IP", value)?),
            _ => None,
        };

        let video_start_bitrate = match vars.get("SFU_VIDEO_START_BITRATE") {
            Some(value) => parse("SFU_VIDEO_START_BITRATE", value)?,
            None => DEFAULT_VIDEO_START_BITRATE,
        };

        let log_format = match vars.get("SFU_LOG_FORMAT") {
            Some(value) => parse("SFU_LOG_FORMAT", value)?,
            None => LogFormat::default(),
        };

        let shutdown_deadline_seconds: u64 = match vars.get("SFU_SHUTDOWN_DEADLINE_SECONDS") {
            Some(value) => parse("SFU_SHUTDOWN_DEADLINE_SECONDS", value)?,
            None => DEFAULT_SHUTDOWN_DEADLINE_SECONDS,
        };

        // Generate SFU instance ID
        let sfu_id = vars.get("SFU_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SFU_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            gateway_bind_address,
            health_bind_address,
            listen_ip,
            announced_ip,
            video_start_bitrate,
            sfu_id,
            log_format,
            shutdown_deadline: Duration::from_secs(shutdown_deadline_seconds),
        })
    }

    /// Media engine settings derived from this configuration.
    #[must_use]
    pub fn engine_config(&self) -> LocalEngineConfig {
        LocalEngineConfig {
            listen_ip: self.listen_ip,
            announced_ip: self.announced_ip,
        }
    }
}

fn parse<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("'{value}': {e}"),
        })
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse(name, vars.get(name).map_or(default, String::as_str))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(
            config.gateway_bind_address,
            DEFAULT_GATEWAY_BIND_ADDRESS.parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            config.health_bind_address,
            DEFAULT_HEALTH_BIND_ADDRESS.parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.announced_ip, None);
        assert_eq!(config.video_start_bitrate, DEFAULT_VIDEO_START_BITRATE);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.shutdown_deadline, Duration::from_secs(10));
        // SFU ID should be auto-generated
        assert!(config.sfu_id.starts_with("sfu-unknown-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("SFU_GATEWAY_BIND_ADDRESS", "127.0.0.1:3002"),
            ("SFU_HEALTH_BIND_ADDRESS", "127.0.0.1:8082"),
            ("SFU_LISTEN_IP", "10.0.0.5"),
            ("SFU_ANNOUNCED_IP", "203.0.113.7"),
            ("SFU_VIDEO_START_BITRATE", "1500"),
            ("SFU_LOG_FORMAT", "json"),
            ("SFU_SHUTDOWN_DEADLINE_SECONDS", "3"),
        ]))
        .expect("Config should load successfully");

        assert_eq!(config.gateway_bind_address.port(), 3002);
        assert_eq!(config.health_bind_address.port(), 8082);
        assert_eq!(config.listen_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(
            config.announced_ip,
            Some("203.0.113.7".parse::<IpAddr>().unwrap())
        );
        assert_eq!(config.video_start_bitrate, 1500);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.shutdown_deadline, Duration::from_secs(3));

        let engine = config.engine_config();
        assert_eq!(engine.listen_ip, config.listen_ip);
        assert_eq!(engine.announced_ip, config.announced_ip);
    }

    #[test]
    fn test_sfu_id_uses_hostname() {
        let config = Config::from_vars(&vars(&[("HOSTNAME", "edge-3")])).unwrap();
        assert!(config.sfu_id.starts_with("sfu-edge-3-"));

        let config = Config::from_vars(&vars(&[("SFU_ID", "sfu-custom-001")])).unwrap();
        assert_eq!(config.sfu_id, "sfu-custom-001");
    }

    #[test]
    fn test_empty_announced_ip_is_unset() {
        let config = Config::from_vars(&vars(&[("SFU_ANNOUNCED_IP", "  ")])).unwrap();
        assert_eq!(config.announced_ip, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (name, value) in [
            ("SFU_GATEWAY_BIND_ADDRESS", "not-an-address"),
            ("SFU_LISTEN_IP", "300.1.1.1"),
            ("SFU_ANNOUNCED_IP", "example.com"),
            ("SFU_VIDEO_START_BITRATE", "-5"),
            ("SFU_LOG_FORMAT", "yaml"),
            ("SFU_SHUTDOWN_DEADLINE_SECONDS", "soon"),
        ] {
            let result = Config::from_vars(&vars(&[(name, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { name: ref n, .. }) if n == name),
                "{name}={value} should be rejected, got {result:?}"
            );
        }
    }
}
