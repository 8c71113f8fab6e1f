//! Server configuration with layered loading.
//!
//! Loading flow:
//! 1. Start with [`ServerConfig::default()`]
//! 2. If a config file is given and exists, deep-merge its values over defaults
//! 3. Apply `PANELCAST_*` environment variable overrides (highest priority)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Errors from loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the panel server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Port for HTTP and WebSocket traffic (`0` picks a free port).
    pub http_port: u16,
    /// Host to bind.
    pub host: String,
    /// Maximum concurrent WebSocket sessions.
    pub max_connections: usize,
    /// Envelopes buffered per session before the oldest is dropped.
    pub session_queue_capacity: usize,
    /// Seconds between server-initiated pings.
    pub heartbeat_interval_secs: u64,
    /// How long closing sessions may spend flushing queued envelopes.
    pub shutdown_drain_ms: u64,
    /// Keys this crate does not interpret (credentials, paths, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8765,
            host: "0.0.0.0".into(),
            max_connections: 256,
            session_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            shutdown_drain_ms: 2000,
            extra: Map::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    /// Parsed bind address, if `host` is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.bind_addr().parse().ok()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }

    /// Load from an optional file, then apply env overrides.
    ///
    /// A missing file yields defaults. Invalid JSON is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = match path {
            Some(path) if path.exists() => {
                debug!(?path, "loading config from file");
                let content = std::fs::read_to_string(path)?;
                let user: Value = serde_json::from_str(&content)?;
                deep_merge(defaults, user)
            }
            Some(path) => {
                debug!(?path, "config file not found, using defaults");
                defaults
            }
            None => defaults,
        };

        let mut config: Self = serde_json::from_value(merged)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `PANELCAST_*` environment overrides. Invalid values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_u16("PANELCAST_HTTP_PORT", 0, 65535) {
            self.http_port = v;
        }
        if let Some(v) = read_env_string("PANELCAST_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_usize("PANELCAST_MAX_CONNECTIONS", 1, 100_000) {
            self.max_connections = v;
        }
    }
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8765);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.session_queue_capacity, 256);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.shutdown_drain_ms, 2000);
        assert!(cfg.extra.is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ServerConfig::default()).unwrap();
        assert_eq!(json["httpPort"], 8765);
        assert_eq!(json["maxConnections"], 256);
        assert_eq!(json["sessionQueueCapacity"], 256);
        assert!(json.get("http_port").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"httpPort": 9000}"#).unwrap();
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn unknown_keys_preserved() {
        let cfg: ServerConfig =
            serde_json::from_str(r#"{"httpPort": 1, "apiToken": "s3cret", "dataDir": "/srv"}"#)
                .unwrap();
        assert_eq!(cfg.extra["apiToken"], "s3cret");
        assert_eq!(cfg.extra["dataDir"], "/srv");

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["apiToken"], "s3cret");
    }

    #[test]
    fn bind_addr_formats() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            http_port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        assert!(cfg.socket_addr().is_some());
    }

    #[test]
    fn heartbeat_interval_never_zero() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn deep_merge_nested() {
        let target = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        let source = json!({"a": {"b": 10}, "d": [3], "e": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"a": {"b": 10, "c": 2}, "d": [3]}));
    }

    #[test]
    fn deep_merge_null_preserves_target() {
        let merged = deep_merge(json!({"httpPort": 1}), json!({"httpPort": null}));
        assert_eq!(merged["httpPort"], 1);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 0, 65535), Some(8080));
        assert_eq!(parse_u16_range(" 80 ", 0, 65535), Some(80));
        assert_eq!(parse_u16_range("70000", 0, 65535), None);
        assert_eq!(parse_u16_range("abc", 0, 65535), None);
        assert_eq!(parse_usize_range("0", 1, 10), None);
        assert_eq!(parse_usize_range("5", 1, 10), Some(5));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(cfg.session_queue_capacity, 256);
    }

    #[test]
    fn load_merges_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sessionQueueCapacity": 8, "shutdownDrainMs": 50, "pluginDir": "/x"}}"#
        )
        .unwrap();
        let cfg = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.session_queue_capacity, 8);
        assert_eq!(cfg.shutdown_drain_ms, 50);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.extra["pluginDir"], "/x");
    }

    #[test]
    fn load_invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = ServerConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
