//! Integration tests for httpgauge
//!
//! These tests drive complete benchmark runs against the in-process test
//! origin server:
//! - Request budget and concurrency bookkeeping
//! - Keep-alive connection reuse and server-initiated close
//! - Timeout and reset classification
//! - Fatal conditions that abort a run

use std::net::SocketAddr;
use std::time::Duration;
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

// Import modules under test
use httpgauge::endpoint::Endpoint;
use httpgauge::error::GaugeError;
use httpgauge::gauge::{Gauge, GaugeSettings};
use httpgauge::origin::{OriginOptions, OriginStats, TestOriginServer};
use httpgauge::request::HttpVersion;

/// Start an origin on an ephemeral port
async fn start_origin(options: OriginOptions) -> (SocketAddr, OriginStats) {
    let server = TestOriginServer::bind("127.0.0.1:0".parse().unwrap(), options)
        .await
        .expect("Should bind test origin");
    let addr = server.local_addr().unwrap();
    let stats = server.stats();
    tokio::spawn(server.run());
    (addr, stats)
}

/// Helper to create run settings against `addr`
fn create_settings(addr: SocketAddr, requests: u64, concurrency: u64, keep_alive: bool) -> GaugeSettings {
    GaugeSettings {
        endpoint: Endpoint::parse(&format!("http://{}/bench?run=1", addr)).unwrap(),
        requests,
        concurrency,
        keep_alive,
        http_version: HttpVersion::Http10,
        data_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
    }
}

#[cfg(test)]
mod budget_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_exact_budget_without_keep_alive() {
        let (addr, origin) = start_origin(OriginOptions {
            body_size: 512,
            ..OriginOptions::default()
        })
        .await;

        let mut gauge = Gauge::new(create_settings(addr, 50, 5, false));
        let report = gauge.run().await.expect("Run should complete");
        let state = gauge.state();

        assert_eq!(state.launched, 50);
        assert_eq!(state.completed, 50);
        assert_eq!(
            state.successes() + state.timeouts + state.resets,
            state.completed
        );
        assert_eq!(report.successes, 50);
        assert_eq!(report.total_bytes, 50 * 512);

        // Every attempt opened its own connection
        assert_eq!(state.connections_opened, 50);
        assert_eq!(origin.connections_accepted(), 50);
        assert_eq!(origin.requests_served(), 50);

        let timing = report.timing.expect("Successful run should have timing");
        assert!(timing.requests_per_second > 0.0);
        assert!(timing.total_time_secs > 0.0);
    }

    #[tokio::test]
    async fn test_concurrency_larger_than_budget() {
        let (addr, _origin) = start_origin(OriginOptions::default()).await;

        let mut gauge = Gauge::new(create_settings(addr, 3, 10, false));
        let report = gauge.run().await.unwrap();

        assert_eq!(gauge.state().launched, 3);
        assert_eq!(gauge.state().completed, 3);
        assert_eq!(report.successes, 3);
    }

    #[tokio::test]
    async fn test_single_request() {
        let (addr, _origin) = start_origin(OriginOptions::default()).await;

        let mut gauge = Gauge::new(create_settings(addr, 1, 1, true));
        let report = gauge.run().await.unwrap();

        assert_eq!(report.requests, 1);
        assert_eq!(report.successes, 1);
        assert_eq!(report.connections_opened, 1);
        assert_eq!(report.path, "/bench?run=1");
    }

    #[tokio::test]
    async fn test_large_body_read_in_full() {
        let body_size = 300 * 1024 + 11;
        let (addr, _origin) = start_origin(OriginOptions {
            body_size,
            ..OriginOptions::default()
        })
        .await;

        let mut gauge = Gauge::new(create_settings(addr, 6, 3, true));
        let report = gauge.run().await.unwrap();

        assert_eq!(report.successes, 6);
        assert_eq!(report.total_bytes, 6 * body_size as u64);
    }

    #[tokio::test]
    async fn test_gauge_runs_once() {
        let (addr, _origin) = start_origin(OriginOptions::default()).await;

        let mut gauge = Gauge::new(create_settings(addr, 2, 1, false));
        gauge.run().await.unwrap();
        assert!(gauge.run().await.is_err());
        assert_eq!(gauge.state().completed, 2);
    }
}

#[cfg(test)]
mod keep_alive_tests {
    use super::*;

    #[tokio::test]
    async fn test_cooperative_server_reuses_connections() {
        let (addr, origin) = start_origin(OriginOptions::default()).await;

        let mut gauge = Gauge::new(create_settings(addr, 40, 4, true));
        let report = gauge.run().await.unwrap();

        assert_eq!(report.successes, 40);
        assert!(report.connections_opened >= 1);
        assert!(report.connections_opened <= 4);
        assert!(origin.connections_accepted() <= 4);
        assert_eq!(origin.requests_served(), 40);
    }

    #[tokio::test]
    async fn test_server_close_forces_new_connection() {
        let (addr, origin) = start_origin(OriginOptions {
            max_requests_per_connection: Some(1),
            ..OriginOptions::default()
        })
        .await;

        let mut gauge = Gauge::new(create_settings(addr, 12, 3, true));
        let report = gauge.run().await.unwrap();

        assert_eq!(report.successes, 12);
        assert_eq!(report.connections_opened, 12);
        assert_eq!(origin.connections_accepted(), 12);
    }

    #[tokio::test]
    async fn test_connection_lifetime_cap() {
        let (addr, origin) = start_origin(OriginOptions {
            max_requests_per_connection: Some(5),
            ..OriginOptions::default()
        })
        .await;

        // Sequential run: every fifth response closes the connection
        let mut gauge = Gauge::new(create_settings(addr, 20, 1, true));
        let report = gauge.run().await.unwrap();

        assert_eq!(report.successes, 20);
        assert_eq!(report.connections_opened, 4);
        assert_eq!(origin.connections_accepted(), 4);
    }

    #[tokio::test]
    async fn test_http11_keep_alive() {
        let (addr, _origin) = start_origin(OriginOptions::default()).await;

        let mut settings = create_settings(addr, 10, 2, true);
        settings.http_version = HttpVersion::Http11;
        let mut gauge = Gauge::new(settings);
        let report = gauge.run().await.unwrap();

        assert_eq!(report.successes, 10);
        assert!(report.connections_opened <= 2);
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let (addr, _origin) = start_origin(OriginOptions {
            response_delay: Some(Duration::from_secs(5)),
            ..OriginOptions::default()
        })
        .await;

        let mut settings = create_settings(addr, 4, 2, true);
        settings.data_timeout = Duration::from_millis(200);
        let mut gauge = Gauge::new(settings);
        let report = gauge.run().await.unwrap();

        assert_eq!(report.timeouts, 4);
        assert_eq!(report.successes, 0);
        assert!(report.timing.is_none());
        // Timed out connections are closed and replaced
        assert_eq!(report.connections_opened, 4);
        assert_eq!(gauge.state().launched, 4);
    }

    #[tokio::test]
    async fn test_reset_connections_are_counted() {
        let (addr, _origin) = start_origin(OriginOptions {
            reset_connections: true,
            ..OriginOptions::default()
        })
        .await;

        let mut gauge = Gauge::new(create_settings(addr, 6, 2, false));
        let report = gauge.run().await.unwrap();

        assert_eq!(report.resets, 6);
        assert_eq!(report.successes, 0);
        assert!(report.timing.is_none());
        assert!(report.to_string().contains("Reset requests:         6"));
    }

    #[tokio::test]
    async fn test_connect_timeout_is_counted() {
        // Listener that never accepts, with its accept queue filled up
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        socket.bind(&bind_addr.into()).unwrap();
        socket.listen(1).unwrap();
        let addr = socket.local_addr().unwrap().as_socket().unwrap();

        let mut queued = Vec::new();
        for _ in 0..64 {
            match timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => queued.push(stream),
                _ => break,
            }
        }

        let mut settings = create_settings(addr, 3, 3, true);
        settings.connect_timeout = Duration::from_millis(200);
        let mut gauge = Gauge::new(settings);
        let report = gauge.run().await.unwrap();

        assert_eq!(report.timeouts, 3);
        assert_eq!(report.successes, 0);
        assert_eq!(report.connections_opened, 3);
        assert!(report.timing.is_none());
        assert_eq!(gauge.state().completed, 3);

        drop(queued);
        drop(socket);
    }

    #[tokio::test]
    async fn test_connection_refused_is_fatal() {
        // Grab a free port and release it so nothing listens there
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut gauge = Gauge::new(create_settings(addr, 5, 2, false));
        let err = gauge.run().await.unwrap_err();

        assert!(
            matches!(err, GaugeError::ConnectionRefused { .. }),
            "unexpected error: {}",
            err
        );
    }
}
