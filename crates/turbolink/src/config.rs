//! Configuration for channels, the request buffer, the health monitor and the service.
//!
//! Durations are expressed in milliseconds on the wire (`timeoutMs`,
//! `max_age_ms`, ...). Every config type has a `Default`, builder-style
//! `with_*` setters and a `validate()` that the engine calls before use.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::error::{ConnectionError, ConnectionResult};

/// Per-channel configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Unique channel identifier
    pub id: String,
    /// Selection priority; higher wins, ties go to the earlier registration
    pub priority: i32,
    /// Period of the channel's own health-check loop
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "healthCheckIntervalMs")]
    pub health_check_interval: Duration,
    /// Upper bound on a single health probe
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeoutMs")]
    pub timeout: Duration,
    /// Consecutive failed probes before the channel is marked unavailable
    pub retry_attempts: u32,
    /// Delay adapters use between their own reconnection attempts
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "retryDelayMs")]
    pub retry_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            priority: 0,
            health_check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ChannelConfig {
    /// Create a channel configuration with default timings.
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
            ..Default::default()
        }
    }

    /// Set the health-check interval.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the failure threshold.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the adapter retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Check the ranges every channel must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Config`] if the id is empty, the interval or
    /// timeout is zero, or `retry_attempts` is zero.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConnectionError::Config("channel id must not be empty".into()));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConnectionError::Config(format!(
                "channel {}: healthCheckIntervalMs must be greater than 0",
                self.id
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConnectionError::Config(format!(
                "channel {}: timeoutMs must be greater than 0",
                self.id
            )));
        }
        if self.retry_attempts == 0 {
            return Err(ConnectionError::Config(format!(
                "channel {}: retryAttempts must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

/// Request buffer limits.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of buffered requests
    pub capacity: usize,
    /// Age after which a buffered request is rejected on the next insertion
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_age_ms")]
    pub max_age: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_age: Duration::from_secs(30),
        }
    }
}

impl BufferConfig {
    /// Create a buffer configuration.
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self { capacity, max_age }
    }

    /// Check the buffer limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Config`] if capacity or max age is zero.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.capacity == 0 {
            return Err(ConnectionError::Config(
                "buffer capacity must be at least 1".into(),
            ));
        }
        if self.max_age.is_zero() {
            return Err(ConnectionError::Config(
                "buffer max_age_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Health monitor polling configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Period of the monitor's per-channel probe
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "interval_ms")]
    pub interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl HealthMonitorConfig {
    /// Check the polling interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Config`] if the interval is zero.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.interval.is_zero() {
            return Err(ConnectionError::Config(
                "health monitor interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for a [`ConnectionService`](crate::ConnectionService).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionServiceConfig {
    /// Request buffer limits
    pub buffer: BufferConfig,
    /// Health monitor polling
    pub health_monitor: HealthMonitorConfig,
}

impl ConnectionServiceConfig {
    /// Set the buffer configuration.
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the health monitor configuration.
    pub fn with_health_monitor(mut self, health_monitor: HealthMonitorConfig) -> Self {
        self.health_monitor = health_monitor;
        self
    }

    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns the first section error encountered.
    pub fn validate(&self) -> ConnectionResult<()> {
        self.buffer.validate()?;
        self.health_monitor.validate()
    }

    /// Load configuration from a file (TOML, YAML, or JSON).
    ///
    /// The format is picked from the file extension. Environment variables with
    /// the `TURBOLINK_` prefix override file settings, using `__` for nesting
    /// (e.g. `TURBOLINK_BUFFER__CAPACITY=500`).
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use turbolink::ConnectionServiceConfig;
    ///
    /// let config = ConnectionServiceConfig::from_file("turbolink.toml")?;
    /// # Ok::<(), turbolink::ConnectionError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Config`] if the file doesn't exist, has an
    /// unsupported extension, fails to parse, or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> ConnectionResult<Self> {
        Self::from_file_with_prefix(path, "TURBOLINK")
    }

    /// Load configuration from a file with a custom environment prefix.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionServiceConfig::from_file`].
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> ConnectionResult<Self> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ConnectionError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(ConnectionError::Config(
                    "unsupported configuration file format, use .toml, .yaml, .yml, or .json"
                        .into(),
                ));
            }
        };

        let path_str = path.to_str().ok_or_else(|| {
            ConnectionError::Config(format!("non UTF-8 path: {}", path.display()))
        })?;

        let loaded: Self = Config::builder()
            .add_source(File::new(path_str, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }
}
