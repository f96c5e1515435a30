use crate::config::GaugeConfig;
use crate::error::Result;
use clap::Parser;

/// Command line of the `httpgauge` binary. Flags override file and
/// environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Concurrent HTTP GET benchmark", long_about = None)]
pub struct CliArgs {
    /// Target URL, http scheme only
    pub url: Option<String>,

    /// Total number of requests to perform
    #[arg(short = 'n', long)]
    pub requests: Option<u64>,

    /// Number of requests kept in flight
    #[arg(short = 'c', long)]
    pub concurrency: Option<u64>,

    /// Reuse connections with HTTP keep-alive
    #[arg(short = 'k', long)]
    pub keep_alive: bool,

    /// HTTP version for the request line (1.0 or 1.1)
    #[arg(long)]
    pub http_version: Option<String>,

    /// Seconds to wait for a complete response
    #[arg(short = 's', long)]
    pub data_timeout: Option<f64>,

    /// Seconds to wait for a connection to open
    #[arg(long)]
    pub connect_timeout: Option<f64>,

    /// Configuration file (TOML)
    #[arg(long)]
    pub config: Option<String>,

    /// Log filter, e.g. "httpgauge=debug"
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Serve Prometheus metrics on this address while running
    #[arg(long)]
    pub metrics_addr: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl CliArgs {
    /// Apply command line overrides on top of `config`
    pub fn apply_to(&self, config: &mut GaugeConfig) -> Result<()> {
        if let Some(url) = &self.url {
            config.target.url = url.clone();
        }
        if let Some(requests) = self.requests {
            config.load.requests = requests;
        }
        if let Some(concurrency) = self.concurrency {
            config.load.concurrency = concurrency;
        }
        if self.keep_alive {
            config.load.keep_alive = true;
        }
        if let Some(version) = &self.http_version {
            config.load.http_version = version.parse()?;
        }
        if let Some(seconds) = self.data_timeout {
            config.timeouts.data_timeout_seconds = seconds;
        }
        if let Some(seconds) = self.connect_timeout {
            config.timeouts.connect_timeout_seconds = seconds;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json {
            config.report.format = "json".to_string();
        }
        if let Some(addr) = &self.metrics_addr {
            config.metrics.enabled = true;
            config.metrics.listen_addr = addr.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpVersion;

    #[test]
    fn test_overrides_applied() {
        let args = CliArgs::try_parse_from([
            "httpgauge",
            "-n",
            "500",
            "-c",
            "20",
            "-k",
            "--http-version",
            "1.1",
            "--data-timeout",
            "2.5",
            "--json",
            "http://localhost:8080/ping",
        ])
        .unwrap();

        let mut config = GaugeConfig::default();
        args.apply_to(&mut config).unwrap();

        assert_eq!(config.target.url, "http://localhost:8080/ping");
        assert_eq!(config.load.requests, 500);
        assert_eq!(config.load.concurrency, 20);
        assert!(config.load.keep_alive);
        assert_eq!(config.load.http_version, HttpVersion::Http11);
        assert_eq!(config.timeouts.data_timeout_seconds, 2.5);
        assert_eq!(config.report.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_absent_flags_keep_config_values() {
        let args = CliArgs::try_parse_from(["httpgauge"]).unwrap();

        let mut config = GaugeConfig::default();
        config.target.url = "http://example.com/".to_string();
        config.load.requests = 42;
        config.load.keep_alive = true;
        args.apply_to(&mut config).unwrap();

        assert_eq!(config.target.url, "http://example.com/");
        assert_eq!(config.load.requests, 42);
        assert!(config.load.keep_alive);
    }

    #[test]
    fn test_bad_http_version_rejected() {
        let args = CliArgs::try_parse_from(["httpgauge", "--http-version", "2"]).unwrap();
        let mut config = GaugeConfig::default();
        assert!(args.apply_to(&mut config).is_err());
    }
}
