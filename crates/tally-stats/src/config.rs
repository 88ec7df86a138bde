//! Configuration for the stats service.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{StatsError, StatsResult};
use crate::event::INCOMING_FIELDS;

// ============================================================================
// Default configuration constants
// ============================================================================

/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default maximum request body size (64 KiB). Push requests are tiny.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Default number of shards. Must be a power of two.
pub const DEFAULT_SHARD_COUNT: usize = 1 << 4;

/// Default flush interval in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Default number of rows per INSERT statement.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Bind placeholders MySQL accepts in one prepared statement.
pub const MAX_STATEMENT_PLACEHOLDERS: usize = 65_535;

/// Largest chunk whose INSERT stays within [`MAX_STATEMENT_PLACEHOLDERS`].
pub const MAX_CHUNK_SIZE: usize = MAX_STATEMENT_PLACEHOLDERS / INCOMING_FIELDS.len();

/// Default property names accepted by the Push endpoint.
pub const DEFAULT_ALLOWED_PROPERTIES: &[&str] = &["news"];

/// Top-level configuration for the stats service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StatsConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Write buffer configuration.
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Identifier generator configuration.
    #[serde(default)]
    pub ids: IdConfig,

    /// Request validation rules.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Prometheus exporter. Disabled when absent.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

impl StatsConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `stats.toml` in the current directory (if present)
    /// 3. Environment variables with `TALLY_` prefix, nested with `__`
    pub fn load() -> StatsResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file("stats.toml")))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> StatsResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file(path.as_ref())))
    }

    fn from_figment(figment: Figment) -> StatsResult<Self> {
        let config: Self = figment
            .merge(Env::prefixed("TALLY_").split("__"))
            .extract()
            .map_err(|e| StatsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the buffer cannot run with.
    pub fn validate(&self) -> StatsResult<()> {
        self.buffer.validate()?;
        if self.validation.allowed_properties.is_empty() {
            return Err(StatsError::config(
                "validation.allowed_properties must not be empty",
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Maximum accepted request body size.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_HTTP_PORT)
}

const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// MySQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds a single connection attempt may take before it counts as failed.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Connection attempts before giving up. Zero retries until `connect_timeout_secs`.
    #[serde(default)]
    pub connect_retries: u32,

    /// Delay between connection attempts in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Overall deadline for establishing the pool in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "mysql://root@localhost:3306/stats".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_acquire_timeout_secs() -> u64 {
    30
}

const fn default_retry_delay_secs() -> u64 {
    5
}

const fn default_connect_timeout_secs() -> u64 {
    300 // 5 minutes
}

impl DatabaseConfig {
    /// Timeout for a single connection attempt.
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Delay between connection attempts.
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Overall connection deadline.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            connect_retries: 0,
            retry_delay_secs: default_retry_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Write buffer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Number of shards. Must be a non-zero power of two.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Flush interval in seconds.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Maximum rows per INSERT statement.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

const fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

const fn default_flush_interval_secs() -> u64 {
    DEFAULT_FLUSH_INTERVAL_SECS
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl BufferConfig {
    /// Flush interval as a [`Duration`].
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Reject a shard count that is not a power of two, a zero interval, or a
    /// chunk size outside `1..=MAX_CHUNK_SIZE`.
    pub fn validate(&self) -> StatsResult<()> {
        if !self.shard_count.is_power_of_two() {
            return Err(StatsError::Config(format!(
                "buffer.shard_count must be a non-zero power of two, got {}",
                self.shard_count
            )));
        }
        if u32::try_from(self.shard_count).is_err() {
            return Err(StatsError::Config(format!(
                "buffer.shard_count {} is too large",
                self.shard_count
            )));
        }
        if self.chunk_size == 0 {
            return Err(StatsError::config("buffer.chunk_size must be non-zero"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(StatsError::Config(format!(
                "buffer.chunk_size {} exceeds {MAX_CHUNK_SIZE} rows per INSERT",
                self.chunk_size
            )));
        }
        if self.flush_interval_secs == 0 {
            return Err(StatsError::config(
                "buffer.flush_interval_secs must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            flush_interval_secs: default_flush_interval_secs(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Identifier generator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdConfig {
    /// Fixed machine id. Derived from the private IPv4 address when absent.
    #[serde(default)]
    pub machine_id: Option<u16>,

    /// Epoch override (RFC 3339).
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

impl From<&IdConfig> for tally_id::Settings {
    fn from(config: &IdConfig) -> Self {
        Self {
            start_time: config.start_time,
            machine_id: config.machine_id,
        }
    }
}

/// Request validation rules.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Property names accepted by Push.
    #[serde(default = "default_allowed_properties")]
    pub allowed_properties: Vec<String>,
}

fn default_allowed_properties() -> Vec<String> {
    DEFAULT_ALLOWED_PROPERTIES
        .iter()
        .map(|p| (*p).to_owned())
        .collect()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_properties: default_allowed_properties(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Address the exporter listens on.
    pub listen_addr: SocketAddr,

    /// Scrape path.
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StatsConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.listen_addr.port(), DEFAULT_HTTP_PORT);
        assert_eq!(config.buffer.shard_count, 16);
        assert_eq!(config.buffer.chunk_size, 1000);
        assert_eq!(config.buffer.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.validation.allowed_properties, vec!["news"]);
        assert!(config.metrics.is_none());
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [database]
            url = "mysql://stats:secret@db:3306/stats"
            max_connections = 20

            [buffer]
            shard_count = 8
            chunk_size = 500

            [ids]
            machine_id = 42

            [metrics]
            listen_addr = "127.0.0.1:9100"
        "#;

        let config: StatsConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.database.url, "mysql://stats:secret@db:3306/stats");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.buffer.shard_count, 8);
        assert_eq!(config.buffer.chunk_size, 500);
        assert_eq!(config.buffer.flush_interval_secs, DEFAULT_FLUSH_INTERVAL_SECS);
        assert_eq!(config.ids.machine_id, Some(42));
        let metrics = config.metrics.unwrap();
        assert_eq!(metrics.listen_addr.port(), 9100);
        assert_eq!(metrics.path, "/metrics");
    }

    #[test]
    fn shard_count_must_be_power_of_two() {
        for bad in [0, 3, 12] {
            let config = StatsConfig {
                buffer: BufferConfig {
                    shard_count: bad,
                    ..BufferConfig::default()
                },
                ..StatsConfig::default()
            };
            assert!(matches!(config.validate(), Err(StatsError::Config(_))));
        }
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config = StatsConfig {
            buffer: BufferConfig {
                chunk_size: 0,
                ..BufferConfig::default()
            },
            ..StatsConfig::default()
        };
        assert!(matches!(config.validate(), Err(StatsError::Config(_))));
    }

    #[test]
    fn chunk_size_bounded_by_statement_placeholders() {
        let buffer = |chunk_size| BufferConfig {
            chunk_size,
            ..BufferConfig::default()
        };

        assert_eq!(MAX_CHUNK_SIZE, 10_922);
        buffer(MAX_CHUNK_SIZE).validate().unwrap();
        assert!(matches!(
            buffer(MAX_CHUNK_SIZE + 1).validate(),
            Err(StatsError::Config(_))
        ));
        assert!(matches!(
            buffer(20_000).validate(),
            Err(StatsError::Config(_))
        ));
    }

    #[test]
    fn empty_allow_list_rejected() {
        let config = StatsConfig {
            validation: ValidationConfig {
                allowed_properties: vec![],
            },
            ..StatsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
