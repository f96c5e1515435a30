use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::gauge::RunState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Unit a transfer rate is rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RateUnit {
    #[serde(rename = "B/s")]
    BytesPerSecond,
    #[serde(rename = "KB/s")]
    KilobytesPerSecond,
    #[serde(rename = "MB/s")]
    MegabytesPerSecond,
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateUnit::BytesPerSecond => "B/s",
            RateUnit::KilobytesPerSecond => "KB/s",
            RateUnit::MegabytesPerSecond => "MB/s",
        })
    }
}

/// Throughput scaled to a readable unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferRate {
    pub value: f64,
    pub unit: RateUnit,
}

impl TransferRate {
    pub fn from_bytes_per_second(rate: f64) -> Self {
        if rate >= MIB {
            Self {
                value: rate / MIB,
                unit: RateUnit::MegabytesPerSecond,
            }
        } else if rate >= KIB {
            Self {
                value: rate / KIB,
                unit: RateUnit::KilobytesPerSecond,
            }
        } else {
            Self {
                value: rate,
                unit: RateUnit::BytesPerSecond,
            }
        }
    }
}

impl fmt::Display for TransferRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.unit)
    }
}

/// Distribution of successful attempt durations, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencySummary {
    /// Nearest-rank percentiles; `None` for an empty sample
    pub fn from_durations(durations: &[Duration]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = durations.iter().map(Duration::as_secs_f64).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let rank = |p: f64| {
            let idx = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
            sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
        };

        Some(Self {
            min: sorted[0],
            p50: rank(50.0),
            p95: rank(95.0),
            p99: rank(99.0),
            max: sorted[sorted.len() - 1],
        })
    }
}

/// Timing figures, only available when at least one attempt succeeded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timing {
    pub total_time_secs: f64,
    pub mean_success_secs: f64,
    pub mean_all_secs: f64,
    pub requests_per_second: f64,
    pub transfer_rate: TransferRate,
    pub latency: LatencySummary,
}

/// Final summary of a run, produced once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub requests: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub resets: u64,
    pub non_2xx: u64,
    pub connections_opened: u64,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
}

impl Report {
    /// Derive the report from the final run state.
    ///
    /// Timing is omitted when nothing succeeded, which also covers a zero
    /// elapsed window.
    pub fn compute(
        endpoint: &Endpoint,
        requests: u64,
        state: &RunState,
        started_at: DateTime<Utc>,
    ) -> Self {
        let timing = match (state.total_time(), state.durations.is_empty()) {
            (Some(total), false) if !total.is_zero() => {
                let total_secs = total.as_secs_f64();
                let success_sum: Duration = state.durations.iter().sum();
                LatencySummary::from_durations(&state.durations).map(|latency| Timing {
                    total_time_secs: total_secs,
                    mean_success_secs: success_sum.as_secs_f64() / state.durations.len() as f64,
                    mean_all_secs: total_secs / requests as f64,
                    requests_per_second: requests as f64 / total_secs,
                    transfer_rate: TransferRate::from_bytes_per_second(
                        state.total_bytes as f64 / total_secs,
                    ),
                    latency,
                })
            }
            _ => None,
        };

        Self {
            started_at,
            host: endpoint.host.clone(),
            port: endpoint.port,
            path: endpoint.path.clone(),
            requests,
            successes: state.successes(),
            timeouts: state.timeouts,
            resets: state.resets,
            non_2xx: state.non_2xx,
            connections_opened: state.connections_opened,
            total_bytes: state.total_bytes,
            timing,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn millis(secs: f64) -> String {
    format!("{:.3} ms", secs * 1000.0)
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Server:                 {}:{}", self.host, self.port)?;
        writeln!(f, "Document path:          {}", self.path)?;
        writeln!(f, "Started at:             {}", self.started_at.to_rfc3339())?;
        writeln!(f)?;
        writeln!(f, "Complete requests:      {}", self.requests)?;
        writeln!(f, "Successful requests:    {}", self.successes)?;
        writeln!(f, "Timed out requests:     {}", self.timeouts)?;
        writeln!(f, "Reset requests:         {}", self.resets)?;
        writeln!(f, "Non-2xx responses:      {}", self.non_2xx)?;
        writeln!(f, "Connections opened:     {}", self.connections_opened)?;
        writeln!(f, "Total transferred:      {} bytes", self.total_bytes)?;

        match &self.timing {
            Some(timing) => {
                writeln!(f, "Transfer rate:          {}", timing.transfer_rate)?;
                writeln!(f, "Time taken for tests:   {:.3} seconds", timing.total_time_secs)?;
                writeln!(f, "Requests per second:    {:.2} [#/sec]", timing.requests_per_second)?;
                writeln!(f, "Mean time (successful): {}", millis(timing.mean_success_secs))?;
                writeln!(f, "Mean time (all):        {}", millis(timing.mean_all_secs))?;
                writeln!(f)?;
                writeln!(f, "Latency of successful requests:")?;
                writeln!(f, "  min  {}", millis(timing.latency.min))?;
                writeln!(f, "  p50  {}", millis(timing.latency.p50))?;
                writeln!(f, "  p95  {}", millis(timing.latency.p95))?;
                writeln!(f, "  p99  {}", millis(timing.latency.p99))?;
                write!(f, "  max  {}", millis(timing.latency.max))
            }
            None => write!(f, "No successful requests; timing figures unavailable"),
        }
    }
}
