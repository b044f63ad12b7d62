//! Ambient configuration: plain, `Default`-backed structs a host
//! constructs programmatically, plus a thin TOML-file layer and a tracing
//! subscriber initializer for example/demo binaries built on top of this
//! library.
//!
//! Grounded on the teacher's `config/mod.rs` CLI/TOML/env priority
//! layering (`DaemonConfig::new`) and `main.rs`'s `setup_logging`. Per the
//! REDESIGN FLAGS, no `Transport` reads the environment itself — only this
//! module and [`crate::auth::auth_chain_from_env`] do, and only when a host
//! explicitly calls them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::error;

use crate::transport::websocket::{QueueFullBehavior, ReconnectConfig};

/// Everything a client needs to open a reconnecting transport: where to
/// connect, and how to behave once connected. Construct directly or via
/// [`RpcClientConfig::from_toml_file`]; never read implicitly by a
/// transport.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub endpoint: String,
    pub reconnect: ReconnectConfig,
}

impl RpcClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Load overrides from a TOML file, falling back to built-in defaults
    /// for anything absent or on parse failure. Never panics; a malformed
    /// file just yields the default layer with a logged warning.
    pub fn from_toml_file(endpoint: impl Into<String>, path: &Path) -> Self {
        let mut config = Self::new(endpoint);
        let Some(file) = load_client_toml(path) else {
            return config;
        };

        if let Some(ms) = file.initial_backoff_ms {
            config.reconnect.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.max_backoff_ms {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(mult) = file.backoff_multiplier {
            config.reconnect.multiplier = mult;
        }
        if let Some(attempts) = file.max_reconnect_attempts {
            config.reconnect.max_attempts = Some(attempts);
        }
        if let Some(ms) = file.heartbeat_interval_ms {
            config.reconnect.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.request_timeout_ms {
            config.reconnect.request_timeout = Duration::from_millis(ms);
        }
        if let Some(allow) = file.allow_insecure_auth {
            config.reconnect.allow_insecure_auth = allow;
        }
        if let Some(policy) = file.queue_full_behavior {
            config.reconnect.queue_full_behavior = policy.into();
        }
        config
    }
}

/// Server-side bind configuration for [`crate::server::RpcHandler`].
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub bind_addr: String,
    pub log_filter: String,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4300".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum TomlQueueFullBehavior {
    Error,
    DropOldest,
    DropNewest,
}

impl From<TomlQueueFullBehavior> for QueueFullBehavior {
    fn from(value: TomlQueueFullBehavior) -> Self {
        match value {
            TomlQueueFullBehavior::Error => QueueFullBehavior::Error,
            TomlQueueFullBehavior::DropOldest => QueueFullBehavior::DropOldest,
            TomlQueueFullBehavior::DropNewest => QueueFullBehavior::DropNewest,
        }
    }
}

/// `{config file}` — every field optional; absence means "use the default
/// already baked into `ReconnectConfig`".
#[derive(Debug, Default, Deserialize)]
struct ClientToml {
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_reconnect_attempts: Option<u32>,
    heartbeat_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    allow_insecure_auth: Option<bool>,
    queue_full_behavior: Option<TomlQueueFullBehavior>,
}

fn load_client_toml(path: &Path) -> Option<ClientToml> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<ClientToml>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config file — using defaults");
            None
        }
    }
}

/// Initialize a compact `tracing-subscriber` fmt layer filtered by `filter`
/// (an `EnvFilter` directive string, e.g. `"info"` or `"debug,my_crate=trace"`).
/// Intended for example binaries and integration harnesses, not library
/// call sites.
pub fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("rpc-core");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("rpc-core");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("rpc-core");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("rpc-core");
        }
    }
    PathBuf::from(".rpc-core")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_config_matches_reconnect_defaults() {
        let config = RpcClientConfig::new("wss://example.test/rpc");
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.endpoint, "wss://example.test/rpc");
    }

    #[test]
    fn from_toml_file_overrides_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpc.toml");
        std::fs::write(&path, "max_backoff_ms = 5000\nallow_insecure_auth = true\n").unwrap();

        let config = RpcClientConfig::from_toml_file("ws://example.test", &path);
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(5000));
        assert!(config.reconnect.allow_insecure_auth);
        // Untouched field keeps its built-in default.
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn missing_toml_file_falls_back_to_defaults() {
        let config = RpcClientConfig::from_toml_file("ws://example.test", Path::new("/nonexistent/rpc.toml"));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn server_config_default_binds_localhost() {
        let config = RpcServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:4300");
    }
}
