//! End-to-end tests of the operational endpoints served over HTTP.

mod common;

use common::{get, send, tcp};
use http::{Method, StatusCode};
use keel_core::{with_grace_period, with_listen, with_service_name};
use keel_server::http::{with_log_control, with_metrics, with_profiler, with_prober, HttpServer};
use keel_server::{ProbeResult, Prober};
use keel_telemetry::{init_metrics, LogLevel, LogLevelHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_unhealthy_probe_turns_health_endpoint_unavailable() {
    let prober = Prober::new();
    let database_up = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&database_up);
    prober
        .register("database", move || ProbeResult::from(flag.load(Ordering::SeqCst)))
        .unwrap();

    let server = HttpServer::new([
        with_listen("127.0.0.1:0"),
        with_service_name("metrics/profiler"),
        with_prober(prober.clone()),
    ])
    .unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let (status, body) = get(addr, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["healthy"], true);

    database_up.store(false, Ordering::SeqCst);
    let (status, body) = get(addr, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["probes"]["database"]["healthy"], false);

    assert_eq!(get(addr, "/healthz/database").await.0, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(get(addr, "/healthz/cache").await.0, StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn test_draining_marks_server_not_ready() {
    let prober = Prober::new();
    prober.ready();

    let server = HttpServer::new([
        with_listen("127.0.0.1:0"),
        with_grace_period(Duration::from_secs(1)),
        with_prober(prober.clone()),
    ])
    .unwrap();
    server.start().await.unwrap();
    assert!(prober.is_healthy());

    server.shutdown().await;
    let readiness = prober.check(keel_server::READINESS_PROBE).unwrap();
    assert!(!readiness.healthy);
}

#[tokio::test]
async fn test_metrics_endpoint_renders_recorded_counters() {
    let registry = init_metrics();
    let server = HttpServer::new([with_listen("127.0.0.1:0"), with_metrics(registry)]).unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let counter = metrics::counter!("ops_e2e_jobs_total");
    counter.increment(1);
    counter.increment(1);

    let (status, body) = get(addr, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("ops_e2e_jobs_total 2"), "metrics body: {body}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_log_level_round_trip_over_http() {
    let handle = LogLevelHandle::detached(LogLevel::Info);
    let server = HttpServer::new([
        with_listen("127.0.0.1:0"),
        with_log_control(handle.clone()),
    ])
    .unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let (status, body) = get(addr, "/log/level").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"level":"info"}"#);

    let (status, _) = send(addr, Method::PUT, "/log/level", r#"{"level":"warn"}"#)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(handle.level(), LogLevel::Warn);

    let (status, _) = send(addr, Method::PUT, "/log/level", r#"{"level":"verbose"}"#)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(handle.level(), LogLevel::Warn);

    let (status, _) = send(addr, Method::DELETE, "/log/level", "").await.unwrap();
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    server.shutdown().await;
}

#[tokio::test]
async fn test_profiler_index_and_unknown_paths() {
    let server = HttpServer::new([with_listen("127.0.0.1:0"), with_profiler()]).unwrap();
    let addr = tcp(&server.start().await.unwrap());

    let (status, body) = get(addr, "/debug/pprof/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("/debug/pprof/process"));

    assert_eq!(get(addr, "/debug/pprof/heap").await.0, StatusCode::NOT_FOUND);

    server.shutdown().await;
}
