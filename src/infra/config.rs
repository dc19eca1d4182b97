//! Configuration loading from TOML files
//!
//! Config file is selected via the `--config <path>` command line argument,
//! defaulting to `config/dev.toml`. A missing or invalid file falls back to
//! built-in defaults.

use anyhow::Context;
use chrono_tz::Tz;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Timezone the feed expects its `time` query parameter in
    #[serde(default = "default_query_timezone")]
    pub query_timezone: String,
    /// Timezone the feed reports passing time-of-day in
    #[serde(default = "default_event_timezone")]
    pub event_timezone: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_query_timezone() -> String {
    "Europe/Oslo".to_string()
}

fn default_event_timezone() -> String {
    "Europe/Helsinki".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamConfig {
    /// Device API root; passings go to `/data`, pings to `/{id}/ping`
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on concurrently outstanding forward calls
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_in_flight() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_passing_window_secs")]
    pub passing_window_secs: u64,
    #[serde(default = "default_status_window_secs")]
    pub status_window_secs: u64,
}

fn default_passing_window_secs() -> u64 {
    30
}

fn default_status_window_secs() -> u64 {
    15
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            passing_window_secs: default_passing_window_secs(),
            status_window_secs: default_status_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllowListConfig {
    /// Only directory records of this device type are allow-listed
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_device_type() -> String {
    "RASPBERRY".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    300
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self {
            device_type: default_device_type(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Status HTTP port (0 to disable)
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_server_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub feed: FeedConfig,
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub allow_list: AllowListConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    feed_url: String,
    query_tz: Tz,
    event_tz: Tz,
    poll_interval_ms: u64,
    feed_timeout_ms: u64,
    downstream_url: String,
    downstream_timeout_ms: u64,
    max_in_flight: usize,
    passing_window_secs: u64,
    status_window_secs: u64,
    device_type: String,
    allow_list_refresh_secs: u64,
    server_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "http://emittiming.cloudapp.net/emitphp/get_stream.php".to_string(),
            query_tz: chrono_tz::Europe::Oslo,
            event_tz: chrono_tz::Europe::Helsinki,
            poll_interval_ms: default_poll_interval_ms(),
            feed_timeout_ms: default_timeout_ms(),
            downstream_url: "https://navisport.fi/api/devices".to_string(),
            downstream_timeout_ms: default_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            passing_window_secs: default_passing_window_secs(),
            status_window_secs: default_status_window_secs(),
            device_type: default_device_type(),
            allow_list_refresh_secs: default_refresh_interval_secs(),
            server_port: default_server_port(),
            metrics_interval_secs: default_metrics_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

fn parse_timezone(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>().map_err(|e| anyhow::anyhow!("invalid timezone '{}': {}", name, e))
}

/// Timer periods must be non-zero; `tokio::time::interval` panics otherwise
fn require_nonzero(value: u64, key: &str) -> anyhow::Result<u64> {
    anyhow::ensure!(value > 0, "{} must be greater than zero", key);
    Ok(value)
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let query_tz = parse_timezone(&toml_config.feed.query_timezone)
            .with_context(|| format!("Invalid feed.query_timezone in {}", path.display()))?;
        let event_tz = parse_timezone(&toml_config.feed.event_timezone)
            .with_context(|| format!("Invalid feed.event_timezone in {}", path.display()))?;

        let poll_interval_ms =
            require_nonzero(toml_config.feed.poll_interval_ms, "feed.poll_interval_ms")
                .with_context(|| format!("Invalid poll interval in {}", path.display()))?;
        let allow_list_refresh_secs = require_nonzero(
            toml_config.allow_list.refresh_interval_secs,
            "allow_list.refresh_interval_secs",
        )
        .with_context(|| format!("Invalid allow-list refresh interval in {}", path.display()))?;

        Ok(Self {
            feed_url: toml_config.feed.url,
            query_tz,
            event_tz,
            poll_interval_ms,
            feed_timeout_ms: toml_config.feed.timeout_ms,
            downstream_url: toml_config.downstream.base_url.trim_end_matches('/').to_string(),
            downstream_timeout_ms: toml_config.downstream.timeout_ms,
            max_in_flight: toml_config.downstream.max_in_flight.max(1),
            passing_window_secs: toml_config.dedup.passing_window_secs,
            status_window_secs: toml_config.dedup.status_window_secs,
            device_type: toml_config.allow_list.device_type,
            allow_list_refresh_secs,
            server_port: toml_config.server.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    pub fn query_tz(&self) -> Tz {
        self.query_tz
    }

    pub fn event_tz(&self) -> Tz {
        self.event_tz
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn downstream_url(&self) -> &str {
        &self.downstream_url
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream_timeout_ms)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn passing_window(&self) -> Duration {
        Duration::from_secs(self.passing_window_secs)
    }

    pub fn status_window(&self) -> Duration {
        Duration::from_secs(self.status_window_secs)
    }

    /// How far back each feed query reaches: the larger dedup span
    pub fn lookback(&self) -> Duration {
        self.passing_window().max(self.status_window())
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn allow_list_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.allow_list_refresh_secs)
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Point the feed and downstream clients at other hosts (tests, staging)
    pub fn with_endpoints(mut self, feed_url: &str, downstream_url: &str) -> Self {
        self.feed_url = feed_url.to_string();
        self.downstream_url = downstream_url.trim_end_matches('/').to_string();
        self
    }
}
