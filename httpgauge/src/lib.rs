//! httpgauge library
//!
//! Drives a fixed number of HTTP GET requests against a server with a fixed
//! number of concurrent connections, optionally reusing them through
//! keep-alive, and summarizes throughput and latency.

pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gauge;
pub mod origin;
pub mod report;
pub mod request;

// Re-export commonly used types
pub use config::GaugeConfig;
pub use endpoint::Endpoint;
pub use error::{GaugeError, Result};
pub use gauge::{Gauge, GaugeSettings, RunState};
pub use origin::{OriginOptions, TestOriginServer};
pub use report::Report;
pub use request::{HttpVersion, Outcome};
