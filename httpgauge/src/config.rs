use crate::endpoint::Endpoint;
use crate::error::{GaugeError, Result};
use crate::gauge::GaugeSettings;
use crate::request::HttpVersion;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `HTTPGAUGE_LOAD__REQUESTS=500`
pub const ENV_PREFIX: &str = "HTTPGAUGE";

/// Largest accepted data or connect timeout, in seconds
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Main configuration for a benchmark run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaugeConfig {
    /// Benchmark target
    pub target: TargetConfig,
    /// Request budget and connection behaviour
    pub load: LoadConfig,
    /// Connect and response timeouts
    pub timeouts: TimeoutConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics and monitoring
    pub metrics: MetricsConfig,
    /// Final report rendering
    pub report: ReportConfig,
}

/// Benchmark target configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Target URL, `http` scheme only
    pub url: String,
}

/// Load shape configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Total number of attempts
    pub requests: u64,
    /// Attempts kept in flight
    pub concurrency: u64,
    /// Request persistent connections
    pub keep_alive: bool,
    /// HTTP version written on the request line
    pub http_version: HttpVersion,
}

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on receiving a complete response, in seconds
    pub data_timeout_seconds: f64,
    /// Bound on establishing a connection, in seconds
    pub connect_timeout_seconds: f64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log format: pretty, json
    pub format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter
    pub enabled: bool,
    /// Prometheus listener address
    pub listen_addr: String,
}

/// Report output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Output format: text, json
    pub format: String,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            requests: 1,
            concurrency: 1,
            keep_alive: false,
            http_version: HttpVersion::Http10,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            data_timeout_seconds: 30.0,
            connect_timeout_seconds: 10.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "httpgauge=info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
        }
    }
}

impl GaugeConfig {
    /// Load configuration from an optional file plus `HTTPGAUGE_*` environment
    /// variables. Missing keys fall back to defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from file
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(path))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Data timeout as Duration
    pub fn data_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeouts.data_timeout_seconds).unwrap_or(Duration::ZERO)
    }

    /// Connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeouts.connect_timeout_seconds).unwrap_or(Duration::ZERO)
    }

    /// Prometheus listener address
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics.listen_addr.parse().map_err(|e| {
            GaugeError::Config(format!(
                "invalid metrics listen address '{}': {}",
                self.metrics.listen_addr, e
            ))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.target.url.is_empty() {
            return Err(GaugeError::Config("target URL is required".to_string()));
        }
        Endpoint::parse(&self.target.url)?;

        if self.load.requests == 0 {
            return Err(GaugeError::Config("requests must be at least 1".to_string()));
        }

        if self.load.concurrency == 0 {
            return Err(GaugeError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("data timeout", self.timeouts.data_timeout_seconds),
            ("connect timeout", self.timeouts.connect_timeout_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(GaugeError::Config(format!(
                    "{} must be a positive number of seconds, got {}",
                    name, value
                )));
            }
            if value > MAX_TIMEOUT_SECS {
                return Err(GaugeError::Config(format!(
                    "{} of {} seconds exceeds the {} second limit",
                    name, value, MAX_TIMEOUT_SECS
                )));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(GaugeError::Config(format!(
                "unknown log format '{}', expected pretty or json",
                self.logging.format
            )));
        }

        if !matches!(self.report.format.as_str(), "text" | "json") {
            return Err(GaugeError::Config(format!(
                "unknown report format '{}', expected text or json",
                self.report.format
            )));
        }

        if self.metrics.enabled {
            self.metrics_addr()?;
        }

        Ok(())
    }

    /// Validate and turn the configuration into run settings
    pub fn gauge_settings(&self) -> Result<GaugeSettings> {
        self.validate()?;

        Ok(GaugeSettings {
            endpoint: Endpoint::parse(&self.target.url)?,
            requests: self.load.requests,
            concurrency: self.load.concurrency,
            keep_alive: self.load.keep_alive,
            http_version: self.load.http_version,
            data_timeout: self.data_timeout(),
            connect_timeout: self.connect_timeout(),
        })
    }
}
