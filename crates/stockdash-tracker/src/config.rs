/*
[INPUT]:  YAML configuration file + STOCKDASH__* environment overrides
[OUTPUT]: Validated tracker configuration (endpoints, streaming, polling)
[POS]:    Configuration layer - tracker setup
[UPDATE]: When adding new configuration options
*/

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Lower bound for the polling interval; smaller values are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

const ENV_PREFIX: &str = "STOCKDASH";

/// Top-level configuration for the task tracker
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Backend endpoints and HTTP timeouts
    pub api: ApiConfig,
    /// Streaming progress channel
    pub streaming: StreamingConfig,
    /// Polling progress channel
    pub polling: PollingConfig,
    /// Per-task buffer of undelivered state transitions per subscriber
    pub subscriber_buffer: usize,
}

/// Backend endpoint configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the dashboard backend (e.g., "http://127.0.0.1:8000")
    pub base_url: String,
    /// WebSocket base URL; derived from `base_url` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Streaming channel configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Disable to observe every task by polling only
    pub enabled: bool,
    /// Ceiling on establishing one connection
    pub connect_timeout_ms: u64,
    /// Heartbeat probe cadence once open
    pub heartbeat_interval_ms: u64,
    /// Silence longer than this marks the connection degraded
    pub heartbeat_grace_ms: u64,
    /// Consecutive reconnection attempts before falling back to polling
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

/// Polling channel configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
    /// Consecutive failed polls tolerated before the channel gives up
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: stockdash_adapter::http::DEFAULT_BASE_URL.to_string(),
            ws_url: None,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_grace_ms: 45_000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            request_timeout_ms: 10_000,
            max_retries: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            streaming: StreamingConfig::default(),
            polling: PollingConfig::default(),
            subscriber_buffer: 64,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl StreamingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_millis(self.heartbeat_grace_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

impl PollingConfig {
    /// Configured interval, raised to [`MIN_POLL_INTERVAL`] if smaller
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms).max(MIN_POLL_INTERVAL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl TrackerConfig {
    /// Load configuration from an optional YAML file layered with environment overrides.
    ///
    /// Environment keys use `STOCKDASH__<SECTION>__<FIELD>`, e.g.
    /// `STOCKDASH__POLLING__INTERVAL_MS=5000`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("assemble configuration sources")?
            .try_deserialize()
            .context("deserialize tracker configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file only
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Default location: `<config dir>/stockdash/tracker.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stockdash").join("tracker.yaml"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.base_url must not be empty");
        }
        if self.subscriber_buffer == 0 {
            bail!("subscriber_buffer must be greater than zero");
        }

        let streaming = &self.streaming;
        if streaming.heartbeat_interval_ms == 0 || streaming.connect_timeout_ms == 0 {
            bail!("streaming timeouts must be greater than zero");
        }
        if streaming.heartbeat_grace_ms <= streaming.heartbeat_interval_ms {
            bail!(
                "streaming.heartbeat_grace_ms ({}) must exceed heartbeat_interval_ms ({})",
                streaming.heartbeat_grace_ms,
                streaming.heartbeat_interval_ms
            );
        }
        if streaming.reconnect_base_delay_ms > streaming.heartbeat_interval_ms {
            bail!("streaming.reconnect_base_delay_ms must not exceed heartbeat_interval_ms");
        }
        if streaming.reconnect_max_delay_ms < streaming.reconnect_base_delay_ms {
            bail!("streaming.reconnect_max_delay_ms must be >= reconnect_base_delay_ms");
        }

        let polling = &self.polling;
        if polling.request_timeout_ms == 0 {
            bail!("polling.request_timeout_ms must be greater than zero");
        }
        if polling.backoff_max_ms < polling.backoff_base_ms {
            bail!("polling.backoff_max_ms must be >= backoff_base_ms");
        }
        if Duration::from_millis(polling.interval_ms) < MIN_POLL_INTERVAL {
            warn!(
                configured_ms = polling.interval_ms,
                floor_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "polling interval below floor; clamping"
            );
        }
        Ok(())
    }
}
