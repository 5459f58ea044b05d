//! Client configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a typed default so a bare environment still yields a usable
//! config. Only the base URL is validated; numeric values that fail to parse
//! fall back to their defaults.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorCode;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_LAYOUT_PATH: &str = ".agentboard/layout.json";

const DEFAULT_RECONNECT_BASE_MS: u64 = 3_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_HEARTBEAT_MS: u64 = 30_000;
/// Floor for the heartbeat period; `tokio::time::interval` rejects zero.
pub const MIN_HEARTBEAT: Duration = Duration::from_millis(10);
/// Heartbeat periods that may pass without an inbound frame before the
/// stream is declared dead.
const HEARTBEAT_MISSES: u32 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0} (expected http:// or https://)")]
    InvalidBaseUrl(String),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl(_) => "E_CONFIG_BASE_URL",
        }
    }
}

// =============================================================================
// RECONNECT POLICY
// =============================================================================

/// Exponential backoff schedule for push-stream reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Retries allowed before the session is declared failed.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based): `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^20 already dwarfs any sane cap; clamping keeps the multiply finite.
        let factor = 1_u32 << attempt.min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// =============================================================================
// STREAM CONFIG
// =============================================================================

/// Settings for the push-stream connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Websocket endpoint, e.g. `ws://localhost:8000/ws`.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Interval between keepalive pings on an open stream.
    pub heartbeat_interval: Duration,
    /// Upper bound on a single open handshake.
    pub connect_timeout: Duration,
}

impl StreamConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Effective ping period, never below [`MIN_HEARTBEAT`].
    #[must_use]
    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_interval.max(MIN_HEARTBEAT)
    }

    /// Silence allowed on an open stream before it is dropped and retried.
    #[must_use]
    pub fn heartbeat_deadline(&self) -> Duration {
        self.heartbeat_period().saturating_mul(HEARTBEAT_MISSES)
    }
}

// =============================================================================
// SYNC CONFIG
// =============================================================================

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// REST base URL without a trailing slash.
    pub base_url: String,
    pub stream: StreamConfig,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// JSON file backing the position cache.
    pub layout_path: PathBuf,
}

impl SyncConfig {
    /// Build a config for `base_url` with every other knob at its default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the URL is not http(s).
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        let ws_url = ws_url(&base_url)?;
        Ok(Self {
            base_url,
            stream: StreamConfig::new(ws_url),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            layout_path: PathBuf::from(DEFAULT_LAYOUT_PATH),
        })
    }

    /// Build typed config from environment variables.
    ///
    /// - `AGENTBOARD_BASE_URL`: REST base URL (default `http://localhost:8000`)
    /// - `AGENTBOARD_WS_URL`: stream URL (default derived from the base URL)
    /// - `AGENTBOARD_RECONNECT_BASE_MS`: default 3000
    /// - `AGENTBOARD_RECONNECT_MAX_MS`: default 30000
    /// - `AGENTBOARD_RECONNECT_MAX_ATTEMPTS`: default 5
    /// - `AGENTBOARD_HEARTBEAT_MS`: default 30000, floored at 10
    /// - `AGENTBOARD_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AGENTBOARD_CONNECT_TIMEOUT_SECS`: default 10
    /// - `AGENTBOARD_LAYOUT_PATH`: default `.agentboard/layout.json`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the base URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("AGENTBOARD_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let mut config = Self::new(&base_url)?;

        if let Ok(url) = std::env::var("AGENTBOARD_WS_URL") {
            config.stream.url = url;
        }
        config.stream.reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(env_parse("AGENTBOARD_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS)),
            max_delay: Duration::from_millis(env_parse("AGENTBOARD_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS)),
            max_attempts: env_parse("AGENTBOARD_RECONNECT_MAX_ATTEMPTS", DEFAULT_RECONNECT_MAX_ATTEMPTS),
        };
        config.stream.heartbeat_interval =
            Duration::from_millis(env_parse("AGENTBOARD_HEARTBEAT_MS", DEFAULT_HEARTBEAT_MS)).max(MIN_HEARTBEAT);

        let connect_secs = env_parse("AGENTBOARD_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);
        config.connect_timeout = Duration::from_secs(connect_secs);
        config.stream.connect_timeout = Duration::from_secs(connect_secs);
        config.request_timeout =
            Duration::from_secs(env_parse("AGENTBOARD_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS));

        if let Ok(path) = std::env::var("AGENTBOARD_LAYOUT_PATH") {
            config.layout_path = PathBuf::from(path);
        }
        Ok(config)
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Derive the push-stream URL from the REST base URL.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] for anything but http(s).
pub fn ws_url(base_url: &str) -> Result<String, ConfigError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }

    Err(ConfigError::InvalidBaseUrl(base_url.to_owned()))
}
