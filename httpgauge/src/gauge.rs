//! Benchmark controller.
//!
//! The gauge keeps `concurrency` attempts in flight until `requests` attempts
//! have completed. Attempts run as tasks in a [`JoinSet`]; their results come
//! back to the single control loop in [`Gauge::run`], which is the only place
//! [`RunState`] is mutated.

use crate::endpoint::Endpoint;
use crate::error::{GaugeError, Result};
use crate::report::Report;
use crate::request::{Connection, Finished, HttpVersion, Outcome, Request, RequestOptions};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Inputs of a single run
#[derive(Debug, Clone)]
pub struct GaugeSettings {
    pub endpoint: Endpoint,
    /// Total attempts N
    pub requests: u64,
    /// Attempts in flight C
    pub concurrency: u64,
    pub keep_alive: bool,
    pub http_version: HttpVersion,
    pub data_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Counters and samples accumulated from completed attempts
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub launched: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub resets: u64,
    /// Successful exchanges with a status outside 2xx
    pub non_2xx: u64,
    /// Fresh connections scheduled, reuses excluded
    pub connections_opened: u64,
    pub total_bytes: u64,
    /// Durations of successful attempts in completion order
    pub durations: Vec<Duration>,
    pub first_success_start: Option<Instant>,
    pub last_success_end: Option<Instant>,
}

impl RunState {
    pub fn successes(&self) -> u64 {
        self.durations.len() as u64
    }

    /// Fold one outcome into the counters
    pub fn record(&mut self, outcome: &Outcome) {
        self.completed += 1;

        match *outcome {
            Outcome::Success {
                bytes_read,
                started,
                finished,
                status,
            } => {
                self.total_bytes += bytes_read;
                self.durations.push(finished.duration_since(started));
                if !(200..300).contains(&status) {
                    self.non_2xx += 1;
                }
                self.first_success_start = Some(match self.first_success_start {
                    Some(first) => first.min(started),
                    None => started,
                });
                self.last_success_end = Some(match self.last_success_end {
                    Some(last) => last.max(finished),
                    None => finished,
                });
            }
            Outcome::Timeout => self.timeouts += 1,
            Outcome::Reset => self.resets += 1,
        }
    }

    /// Elapsed time between the first successful start and the end marker
    pub fn total_time(&self) -> Option<Duration> {
        match (self.first_success_start, self.last_success_end) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }
}

/// Shared, read-only inputs of every attempt task
struct AttemptContext {
    addr: SocketAddr,
    endpoint: Arc<Endpoint>,
    options: RequestOptions,
    connect_timeout: Duration,
}

/// How an attempt obtains its connection
enum Lease {
    Fresh { connection_id: u64 },
    Reused {
        connection: Connection,
        handed_off: Instant,
    },
}

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        "httpgauge_attempts_total",
        "Completed attempts, labelled by outcome"
    );
    describe_counter!(
        "httpgauge_connections_opened_total",
        "Fresh connections opened towards the target"
    );
    describe_counter!(
        "httpgauge_bytes_received_total",
        "Response body bytes received"
    );
    describe_histogram!(
        "httpgauge_attempt_duration_seconds",
        "Duration of successful attempts"
    );
}

/// Benchmark controller owning the run state
pub struct Gauge {
    settings: GaugeSettings,
    state: RunState,
    next_connection_id: u64,
    started_at: Option<DateTime<Utc>>,
}

impl Gauge {
    pub fn new(settings: GaugeSettings) -> Self {
        Self {
            settings,
            state: RunState::default(),
            next_connection_id: 0,
            started_at: None,
        }
    }

    pub fn settings(&self) -> &GaugeSettings {
        &self.settings
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run the benchmark to `requests` completions and build the report.
    ///
    /// Returns an error for run-fatal conditions: refused connections,
    /// protocol violations and failed attempt tasks.
    pub async fn run(&mut self) -> Result<Report> {
        if self.started_at.is_some() {
            return Err(GaugeError::Other("gauge has already run".to_string()));
        }
        if self.settings.requests == 0 || self.settings.concurrency == 0 {
            return Err(GaugeError::Config(
                "requests and concurrency must be positive".to_string(),
            ));
        }
        self.started_at = Some(Utc::now());

        let addr = self.settings.endpoint.resolve().await?;
        let ctx = Arc::new(AttemptContext {
            addr,
            endpoint: Arc::new(self.settings.endpoint.clone()),
            options: RequestOptions {
                version: self.settings.http_version,
                keep_alive: self.settings.keep_alive,
                data_timeout: self.settings.data_timeout,
            },
            connect_timeout: self.settings.connect_timeout,
        });

        if self.settings.concurrency > self.settings.requests {
            warn!(
                concurrency = self.settings.concurrency,
                requests = self.settings.requests,
                "Concurrency exceeds request count, only {} attempts will run at once",
                self.settings.requests
            );
        }

        info!(
            target_addr = %addr,
            endpoint = %self.settings.endpoint,
            path = %self.settings.endpoint.path,
            requests = self.settings.requests,
            concurrency = self.settings.concurrency,
            keep_alive = self.settings.keep_alive,
            "Starting benchmark"
        );

        let mut attempts = JoinSet::new();
        let initial = self.settings.concurrency.min(self.settings.requests);
        for _ in 0..initial {
            self.launch(&mut attempts, &ctx, None);
        }

        let progress_step = (self.settings.requests / 10).max(1);
        while let Some(joined) = attempts.join_next().await {
            let finished = joined??;
            self.on_completion(finished, &mut attempts, &ctx);

            if self.state.completed % progress_step == 0 {
                info!(
                    completed = self.state.completed,
                    total = self.settings.requests,
                    "Progress"
                );
            }
            if self.state.completed == self.settings.requests {
                break;
            }
        }

        if self.state.completed != self.settings.requests {
            return Err(GaugeError::Other(format!(
                "attempt set drained after {} of {} completions",
                self.state.completed, self.settings.requests
            )));
        }

        // Nothing is in flight here; late results must never reach the state
        attempts.abort_all();

        Ok(self.finalize())
    }

    /// Single serialization point for completed attempts
    fn on_completion(
        &mut self,
        finished: Finished,
        attempts: &mut JoinSet<Result<Finished>>,
        ctx: &Arc<AttemptContext>,
    ) {
        let Finished {
            outcome,
            connection,
            server_close,
        } = finished;

        self.state.record(&outcome);
        counter!("httpgauge_attempts_total", 1, "outcome" => outcome.label());
        if let Outcome::Success { bytes_read, .. } = outcome {
            counter!("httpgauge_bytes_received_total", bytes_read);
        }
        if let Some(duration) = outcome.duration() {
            histogram!("httpgauge_attempt_duration_seconds", duration.as_secs_f64());
        }

        if self.state.launched >= self.settings.requests {
            return;
        }

        // Dropping a connection that is not reused closes it
        let reuse = match connection {
            Some(connection)
                if outcome.is_success() && self.settings.keep_alive && !server_close =>
            {
                Some(connection)
            }
            _ => None,
        };
        self.launch(attempts, ctx, reuse);
    }

    fn launch(
        &mut self,
        attempts: &mut JoinSet<Result<Finished>>,
        ctx: &Arc<AttemptContext>,
        reuse: Option<Connection>,
    ) {
        self.state.launched += 1;

        let lease = match reuse {
            Some(connection) => Lease::Reused {
                connection,
                handed_off: Instant::now(),
            },
            None => {
                self.next_connection_id += 1;
                self.state.connections_opened += 1;
                counter!("httpgauge_connections_opened_total", 1);
                Lease::Fresh {
                    connection_id: self.next_connection_id,
                }
            }
        };

        attempts.spawn(run_attempt(Arc::clone(ctx), lease));
    }

    fn finalize(&mut self) -> Report {
        if self.state.first_success_start.is_some() {
            self.state.last_success_end = Some(Instant::now());
        }

        let report = Report::compute(
            &self.settings.endpoint,
            self.settings.requests,
            &self.state,
            self.started_at.unwrap_or_else(Utc::now),
        );

        info!(
            completed = self.state.completed,
            successes = self.state.successes(),
            timeouts = self.state.timeouts,
            resets = self.state.resets,
            connections_opened = self.state.connections_opened,
            "Benchmark finished"
        );
        report
    }
}

/// Open or adopt a connection and drive one request over it
async fn run_attempt(ctx: Arc<AttemptContext>, lease: Lease) -> Result<Finished> {
    let (connection, started) = match lease {
        Lease::Reused {
            connection,
            handed_off,
        } => (connection, handed_off),
        Lease::Fresh { connection_id } => {
            let started = Instant::now();
            match open_connection(&ctx, connection_id).await? {
                Ok(connection) => (connection, started),
                Err(outcome) => return Ok(Finished::failed(outcome)),
            }
        }
    };

    Request::new(connection, Arc::clone(&ctx.endpoint), ctx.options, started)
        .get()
        .await
}

/// Connect within the connection timeout.
///
/// The inner `Err` is a counted outcome; the outer one aborts the run.
async fn open_connection(
    ctx: &AttemptContext,
    connection_id: u64,
) -> Result<std::result::Result<Connection, Outcome>> {
    let stream = match timeout(ctx.connect_timeout, TcpStream::connect(ctx.addr)).await {
        Err(_) => {
            debug!(connection_id, addr = %ctx.addr, "Connect timed out");
            return Ok(Err(Outcome::Timeout));
        }
        Ok(Err(e)) => {
            debug!(connection_id, error = %e, "Connect failed");
            return connect_failure(e, ctx.addr).map(Err);
        }
        Ok(Ok(stream)) => stream,
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(connection_id, error = %e, "Failed to set TCP_NODELAY");
    }

    debug!(connection_id, addr = %ctx.addr, "Connection established");
    Ok(Ok(Connection::new(stream, connection_id)))
}

/// Counted outcome for a failed connect, or the error that aborts the run
fn connect_failure(e: io::Error, addr: SocketAddr) -> Result<Outcome> {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => Err(GaugeError::ConnectionRefused { addr }),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Ok(Outcome::Reset),
        _ => Err(GaugeError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(started: Instant, millis: u64, bytes_read: u64, status: u16) -> Outcome {
        Outcome::Success {
            bytes_read,
            started,
            finished: started + Duration::from_millis(millis),
            status,
        }
    }

    #[test]
    fn test_connect_failure_classification() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let reset = connect_failure(io::Error::from(io::ErrorKind::ConnectionReset), addr);
        assert!(matches!(reset, Ok(Outcome::Reset)));

        let aborted = connect_failure(io::Error::from(io::ErrorKind::ConnectionAborted), addr);
        assert!(matches!(aborted, Ok(Outcome::Reset)));

        let refused = connect_failure(io::Error::from(io::ErrorKind::ConnectionRefused), addr);
        assert!(matches!(
            refused,
            Err(GaugeError::ConnectionRefused { addr: a }) if a == addr
        ));

        let other = connect_failure(io::Error::from(io::ErrorKind::PermissionDenied), addr);
        assert!(matches!(other, Err(GaugeError::Io(_))));
    }

    #[test]
    fn test_record_counts_every_outcome() {
        let base = Instant::now();
        let mut state = RunState::default();

        state.record(&success(base, 10, 100, 200));
        state.record(&Outcome::Timeout);
        state.record(&Outcome::Reset);
        state.record(&success(base + Duration::from_millis(5), 30, 50, 503));

        assert_eq!(state.completed, 4);
        assert_eq!(state.successes(), 2);
        assert_eq!(state.timeouts, 1);
        assert_eq!(state.resets, 1);
        assert_eq!(state.non_2xx, 1);
        assert_eq!(state.total_bytes, 150);
        assert_eq!(
            state.successes() + state.timeouts + state.resets,
            state.completed
        );
        assert_eq!(
            state.durations,
            vec![Duration::from_millis(10), Duration::from_millis(30)]
        );
    }

    #[test]
    fn test_record_tracks_success_window() {
        let base = Instant::now();
        let mut state = RunState::default();
        assert!(state.total_time().is_none());

        // Completion order differs from start order
        state.record(&success(base + Duration::from_millis(20), 10, 0, 200));
        state.record(&success(base, 5, 0, 200));

        assert_eq!(state.first_success_start, Some(base));
        assert_eq!(
            state.last_success_end,
            Some(base + Duration::from_millis(30))
        );
        assert_eq!(state.total_time(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_failures_leave_timing_unset() {
        let mut state = RunState::default();
        state.record(&Outcome::Timeout);
        state.record(&Outcome::Reset);

        assert_eq!(state.successes(), 0);
        assert!(state.first_success_start.is_none());
        assert!(state.total_time().is_none());
    }

    #[tokio::test]
    async fn test_zero_requests_rejected() {
        let mut gauge = Gauge::new(GaugeSettings {
            endpoint: Endpoint::parse("http://127.0.0.1:9/").unwrap(),
            requests: 0,
            concurrency: 1,
            keep_alive: false,
            http_version: HttpVersion::Http10,
            data_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
        });

        assert!(matches!(gauge.run().await, Err(GaugeError::Config(_))));
    }
}
