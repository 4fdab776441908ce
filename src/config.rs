//! Client configuration.
//!
//! [`NetConfig`] can be built in code or deserialized from TOML/JSON; every
//! field except `server_url` has a default.
//!
//! ```
//! use nonogram_net::config::NetConfig;
//! use std::time::Duration;
//!
//! let config = NetConfig::new("https://game.example.com")
//!     .with_http_timeout(Duration::from_secs(5))
//!     .with_header("X-Client-Version", "1.4.0");
//! assert_eq!(config.lobby_room, "lobby");
//! assert_eq!(config.http_timeout(), Duration::from_secs(5));
//! ```

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
pub const DEFAULT_DEV_MODE_RETRIES: u32 = 8;
pub const DEFAULT_DEV_MODE_RETRY_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_CACHE_NAMESPACE: &str = "Onet_1.0";

fn default_http_timeout_ms() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}

fn default_join_timeout_ms() -> u64 {
    DEFAULT_JOIN_TIMEOUT_MS
}

fn default_lobby_room() -> String {
    crate::lobby::DEFAULT_LOBBY_ROOM.to_owned()
}

fn default_reconnect_initial_ms() -> u64 {
    DEFAULT_RECONNECT_INITIAL_MS
}

fn default_reconnect_max_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_MS
}

fn default_dev_mode_retries() -> u32 {
    DEFAULT_DEV_MODE_RETRIES
}

fn default_dev_mode_retry_interval_ms() -> u64 {
    DEFAULT_DEV_MODE_RETRY_INTERVAL_MS
}

fn default_cache_namespace() -> String {
    DEFAULT_CACHE_NAMESPACE.to_owned()
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

/// Settings for [`PendingNetManager`](crate::manager::PendingNetManager).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetConfig {
    /// Base URL of the game server, e.g. `https://game.example.com`.
    pub server_url: String,
    /// Per-request HTTP timeout.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// How long a room connection may take to be confirmed.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    #[serde(default = "default_lobby_room")]
    pub lobby_room: String,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Reconnect attempts after a development server restart.
    #[serde(default = "default_dev_mode_retries")]
    pub dev_mode_retries: u32,
    #[serde(default = "default_dev_mode_retry_interval_ms")]
    pub dev_mode_retry_interval_ms: u64,
    /// Prefix of persisted cache keys.
    #[serde(default = "default_cache_namespace")]
    pub cache_namespace: String,
    /// Extra headers for HTTP requests and room connections.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Grace period for background tasks on shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl NetConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            lobby_room: default_lobby_room(),
            reconnect_initial_ms: DEFAULT_RECONNECT_INITIAL_MS,
            reconnect_max_ms: DEFAULT_RECONNECT_MAX_MS,
            dev_mode_retries: DEFAULT_DEV_MODE_RETRIES,
            dev_mode_retry_interval_ms: DEFAULT_DEV_MODE_RETRY_INTERVAL_MS,
            cache_namespace: default_cache_namespace(),
            headers: Vec::new(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_lobby_room(mut self, name: impl Into<String>) -> Self {
        self.lobby_room = name.into();
        self
    }

    /// Reconnect backoff bounds. `max` is raised to `initial` if smaller.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_ms = duration_ms(initial);
        self.reconnect_max_ms = duration_ms(max).max(self.reconnect_initial_ms);
        self
    }

    #[must_use]
    pub fn with_dev_mode_retry(mut self, retries: u32, interval: Duration) -> Self {
        self.dev_mode_retries = retries;
        self.dev_mode_retry_interval_ms = duration_ms(interval);
        self
    }

    #[must_use]
    pub fn with_cache_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.cache_namespace = namespace.into();
        self
    }

    /// Add a header sent with every HTTP request and room connection.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// A zero timeout aborts background tasks without waiting.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms))
    }

    pub fn dev_mode_retry_interval(&self) -> Duration {
        Duration::from_millis(self.dev_mode_retry_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_new() {
        let parsed: NetConfig =
            serde_json::from_str(r#"{ "server_url": "https://game.example.com" }"#).unwrap();
        assert_eq!(parsed, NetConfig::new("https://game.example.com"));
        assert_eq!(parsed.reconnect_initial(), Duration::from_secs(1));
        assert_eq!(parsed.reconnect_max(), Duration::from_secs(10));
        assert_eq!(parsed.cache_namespace, "Onet_1.0");
    }

    #[test]
    fn backoff_max_never_below_initial() {
        let config = NetConfig::new("http://localhost:2567")
            .with_reconnect_backoff(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(config.reconnect_max(), Duration::from_secs(5));
    }

    #[test]
    fn builders_chain() {
        let config = NetConfig::new("http://localhost:2567")
            .with_lobby_room("lobby_eu")
            .with_header("X-A", "1")
            .with_dev_mode_retry(3, Duration::from_millis(500))
            .with_shutdown_timeout(Duration::ZERO);
        assert_eq!(config.lobby_room, "lobby_eu");
        assert_eq!(config.headers, vec![("X-A".to_string(), "1".to_string())]);
        assert_eq!(config.dev_mode_retries, 3);
        assert_eq!(config.dev_mode_retry_interval(), Duration::from_millis(500));
        assert_eq!(config.shutdown_timeout(), Duration::ZERO);
    }
}
