mod utils;
use utils::*;

use stampede::core::SESSION_UNAVAILABLE;
use stampede::prelude::*;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn every_operation_succeeds() {
    let addr = init().await;

    let report = LoadTest::new(&url(addr, "/delay/ms/5"), HttpSessionProvider::unbounded())
        .users(10)
        .operations(5)
        .pacing(Duration::from_millis(10))
        .operation_timeout(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.total_attempted, 50);
    assert_eq!(report.succeeded, 50);
    assert_eq!(report.total_failed(), 0);
    assert_eq!(report.timed_out, 0);
    assert!(!report.incomplete);
    assert!(report.latency.min >= Duration::from_millis(5));
    assert!(report.latency.p50 <= report.latency.p95);
    assert!(report.latency.p95 <= report.latency.p99);
    assert!(report.latency.p99 <= report.latency.max);
}

#[tokio::test(flavor = "multi_thread")]
async fn pages_are_counted() {
    let addr = init().await;

    let report = LoadTest::new(&url(addr, "/"), HttpSessionProvider::unbounded())
        .users(2)
        .operations(3)
        .pacing(Duration::ZERO)
        .await
        .unwrap();

    let page = "<html><body>stampede mock service</body></html>".len() as u64;
    assert_eq!(report.bytes_received, 6 * page);
}

#[tokio::test(flavor = "multi_thread")]
async fn error_statuses_are_failures() {
    let addr = init().await;

    let report = LoadTest::new(&url(addr, "/status/500"), HttpSessionProvider::unbounded())
        .users(3)
        .operations(4)
        .pacing(Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(report.total_attempted, 12);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed["http_500"], 12);
    assert_eq!(report.last_errors["http_500"], "status 500");
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_is_a_transport_failure() {
    init().await;
    // Bind and drop a listener to find a port nothing listens on.
    let closed = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let report = LoadTest::new(&url(closed, "/"), HttpSessionProvider::unbounded())
        .users(2)
        .operations(2)
        .pacing(Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(report.total_attempted, 4);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed["transport"], 4);
    assert!(report.last_errors["transport"].starts_with("transport error"));
    assert_eq!(report.bytes_received, 0);
    assert!(!report.incomplete);
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_keep_their_own_cookies() {
    let addr = init().await;

    let report = LoadTest::new(&url(addr, "/returning"), HttpSessionProvider::unbounded())
        .users(3)
        .operations(3)
        .pacing(Duration::ZERO)
        .await
        .unwrap();

    // Each session is turned away once, then recognised.
    assert_eq!(report.failed["http_401"], 3);
    assert_eq!(report.succeeded, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_target_times_out() {
    let addr = init().await;

    let report = LoadTest::new(&url(addr, "/delay/ms/2000"), HttpSessionProvider::unbounded())
        .users(4)
        .operations(2)
        .pacing(Duration::ZERO)
        .operation_timeout(Duration::from_millis(100))
        .await
        .unwrap();

    assert_eq!(report.total_attempted, 8);
    assert_eq!(report.timed_out, 8);
    assert_eq!(report.succeeded, 0);
    assert!(report.wall_clock < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn over_capacity_target_reports_503() {
    let addr = init().await;

    let report = LoadTest::new(
        &url(addr, "/limited/5/delay/ms/1/server/over-capacity"),
        HttpSessionProvider::unbounded(),
    )
    .users(20)
    .operations(2)
    .pacing(Duration::ZERO)
    .await
    .unwrap();

    assert_eq!(report.total_attempted, 40);
    assert!(report.succeeded >= 1);
    assert!(report.failed["http_503"] >= 1);
    assert_eq!(report.succeeded + report.total_failed(), 40);
}

#[tokio::test(flavor = "multi_thread")]
async fn session_cap_leaves_users_without_sessions() {
    let addr = init().await;

    let report = LoadTest::new(&url(addr, "/delay/ms/50"), HttpSessionProvider::new(2))
        .users(5)
        .operations(3)
        .pacing(Duration::from_millis(20))
        .acquire_timeout(Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(report.failed[SESSION_UNAVAILABLE], 3);
    assert_eq!(report.succeeded, 6);
    assert_eq!(report.truncated_users().count(), 3);
    assert!(!report.incomplete);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_run_still_reports() {
    let addr = init().await;
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });
    }

    let report = LoadTest::new(&url(addr, "/delay/ms/10"), HttpSessionProvider::new(8))
        .users(8)
        .operations(10_000)
        .pacing(Duration::from_millis(5))
        .cancel_on(cancel)
        .await
        .unwrap();

    assert!(report.incomplete);
    assert!(report.total_attempted > 0);
    assert!(report.total_attempted < 80_000);
    assert_eq!(report.users.len(), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn report_serializes() {
    let addr = init().await;

    let report = LoadTest::new(&url(addr, "/"), HttpSessionProvider::unbounded())
        .users(2)
        .operations(2)
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["totalAttempted"], 4);
    assert_eq!(json["succeeded"], 4);
    assert!(json["bytesReceived"].as_u64().unwrap() > 0);
    assert!(json["latency"]["p99"].is_number());
}
