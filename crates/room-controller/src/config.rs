//! Room controller configuration.
//!
//! Configuration is loaded from environment variables; every field has a
//! sensible default so the server starts with no environment at all.

use media_engine::types::WorkerSettings;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use std::num::NonZeroUsize;
use thiserror::Error;

/// Default gateway bind address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:4443";

/// Default RTC listening IP.
pub const DEFAULT_RTC_LISTEN_IP: &str = "0.0.0.0";

/// Default lower bound of the RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40_000;

/// Default upper bound of the RTC port range.
pub const DEFAULT_RTC_MAX_PORT: u16 = 49_999;

/// Default max incoming bitrate applied to WebRTC transports.
pub const DEFAULT_MAX_INCOMING_BITRATE: u32 = 1_500_000;

/// Default initial outgoing bitrate estimate.
pub const DEFAULT_INITIAL_AVAILABLE_OUTGOING_BITRATE: u32 = 1_000_000;

/// Default maximum SCTP message size in bytes.
pub const DEFAULT_MAX_SCTP_MESSAGE_SIZE: u32 = 262_144;

/// Room controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway bind address (WebSocket signaling + admin HTTP).
    pub listen_address: String,

    /// Number of media workers to launch at startup.
    pub num_workers: usize,

    /// RTC listening IP handed to the media engine.
    pub rtc_listen_ip: String,

    /// IP announced to remote endpoints, when behind NAT.
    pub rtc_announced_ip: Option<String>,

    /// Lower bound of the RTC port range.
    pub rtc_min_port: u16,

    /// Upper bound of the RTC port range.
    pub rtc_max_port: u16,

    /// Extra server-side consumers created per (producer, peer) pair.
    pub consumer_replicas: u32,

    /// Max incoming bitrate applied to new WebRTC transports, when set.
    pub max_incoming_bitrate: Option<u32>,

    /// Initial outgoing bitrate estimate for WebRTC transports.
    pub initial_available_outgoing_bitrate: u32,

    /// Maximum SCTP message size in bytes.
    pub max_sctp_message_size: u32,

    /// Media worker log level.
    pub worker_log_level: String,

    /// Media worker log tags.
    pub worker_log_tags: Vec<String>,

    /// Router media codec list.
    pub media_codecs: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn default_worker_log_tags() -> Vec<String> {
    [
        "info", "ice", "dtls", "rtp", "srtp", "rtcp", "rtx", "bwe", "score", "simulcast", "svc",
        "sctp",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_media_codecs() -> Vec<Value> {
    vec![
        json!({
            "kind": "audio",
            "mimeType": "audio/opus",
            "clockRate": 48_000,
            "channels": 2,
        }),
        json!({
            "kind": "video",
            "mimeType": "video/VP8",
            "clockRate": 90_000,
            "parameters": {
                "x-google-start-bitrate": 1000,
            },
        }),
    ]
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let listen_address = vars
            .get("ROOM_LISTEN_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());

        let num_workers = vars
            .get("ROOM_NUM_WORKERS")
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_num_workers);

        let rtc_listen_ip = vars
            .get("ROOM_RTC_LISTEN_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RTC_LISTEN_IP.to_string());

        let rtc_announced_ip = vars
            .get("ROOM_RTC_ANNOUNCED_IP")
            .filter(|s| !s.is_empty())
            .cloned();

        let rtc_min_port = vars
            .get("ROOM_RTC_MIN_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RTC_MIN_PORT);

        let rtc_max_port = vars
            .get("ROOM_RTC_MAX_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RTC_MAX_PORT);

        let consumer_replicas = vars
            .get("ROOM_CONSUMER_REPLICAS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        // 0 disables the limit.
        let max_incoming_bitrate = vars
            .get("ROOM_MAX_INCOMING_BITRATE")
            .and_then(|s| s.parse().ok())
            .map_or(Some(DEFAULT_MAX_INCOMING_BITRATE), |bitrate: u32| {
                (bitrate > 0).then_some(bitrate)
            });

        let initial_available_outgoing_bitrate = vars
            .get("ROOM_INITIAL_OUTGOING_BITRATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INITIAL_AVAILABLE_OUTGOING_BITRATE);

        let max_sctp_message_size = vars
            .get("ROOM_MAX_SCTP_MESSAGE_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_SCTP_MESSAGE_SIZE);

        let worker_log_level = vars
            .get("ROOM_WORKER_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| "warn".to_string());

        if num_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_NUM_WORKERS must be at least 1".to_string(),
            ));
        }

        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RTC port range is empty: {rtc_min_port}-{rtc_max_port}"
            )));
        }

        Ok(Config {
            listen_address,
            num_workers,
            rtc_listen_ip,
            rtc_announced_ip,
            rtc_min_port,
            rtc_max_port,
            consumer_replicas,
            max_incoming_bitrate,
            initial_available_outgoing_bitrate,
            max_sctp_message_size,
            worker_log_level,
            worker_log_tags: default_worker_log_tags(),
            media_codecs: default_media_codecs(),
        })
    }

    /// Worker settings derived from this configuration.
    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            log_level: self.worker_log_level.clone(),
            log_tags: self.worker_log_tags.clone(),
            rtc_min_port: self.rtc_min_port,
            rtc_max_port: self.rtc_max_port,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(config.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert!(config.num_workers >= 1);
        assert_eq!(config.rtc_listen_ip, DEFAULT_RTC_LISTEN_IP);
        assert_eq!(config.rtc_announced_ip, None);
        assert_eq!(config.rtc_min_port, DEFAULT_RTC_MIN_PORT);
        assert_eq!(config.rtc_max_port, DEFAULT_RTC_MAX_PORT);
        assert_eq!(config.consumer_replicas, 0);
        assert_eq!(
            config.max_incoming_bitrate,
            Some(DEFAULT_MAX_INCOMING_BITRATE)
        );
        assert_eq!(config.max_sctp_message_size, DEFAULT_MAX_SCTP_MESSAGE_SIZE);
        assert_eq!(config.media_codecs.len(), 2);
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            (
                "ROOM_LISTEN_ADDRESS".to_string(),
                "127.0.0.1:9000".to_string(),
            ),
            ("ROOM_NUM_WORKERS".to_string(), "2".to_string()),
            ("ROOM_RTC_ANNOUNCED_IP".to_string(), "203.0.113.5".to_string()),
            ("ROOM_CONSUMER_REPLICAS".to_string(), "3".to_string()),
            ("ROOM_MAX_INCOMING_BITRATE".to_string(), "0".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("config should load");

        assert_eq!(config.listen_address, "127.0.0.1:9000");
        assert_eq!(config.num_workers, 2);
        assert_eq!(
            config.rtc_announced_ip,
            Some("203.0.113.5".to_string())
        );
        assert_eq!(config.consumer_replicas, 3);
        // 0 disables the limit.
        assert_eq!(config.max_incoming_bitrate, None);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let vars = HashMap::from([("ROOM_NUM_WORKERS".to_string(), "0".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_empty_port_range_rejected() {
        let vars = HashMap::from([
            ("ROOM_RTC_MIN_PORT".to_string(), "45000".to_string()),
            ("ROOM_RTC_MAX_PORT".to_string(), "44000".to_string()),
        ]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_worker_settings_derivation() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let settings = config.worker_settings();

        assert_eq!(settings.rtc_min_port, config.rtc_min_port);
        assert_eq!(settings.rtc_max_port, config.rtc_max_port);
        assert_eq!(settings.log_level, "warn");
        assert!(settings.log_tags.contains(&"ice".to_string()));
    }
}
