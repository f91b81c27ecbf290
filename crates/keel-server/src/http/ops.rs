//! Operational routes: health probes, metrics scrape, diagnostics, and
//! runtime log level control.

use super::{json, respond, text, HttpOption, HttpRegistrar, RouteParams};
use crate::health::{ProbeResult, Prober};
use http::StatusCode;
use keel_core::with_attach;
use keel_middleware::{Request, RequestError, Response};
use keel_telemetry::{runtime_snapshot, LogLevel, LogLevelHandle, MetricsRegistry, ProcessCollector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Longest a health request waits for its checks.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const PPROF_INDEX: &str = "\
/debug/pprof/cmdline  command line of the running process
/debug/pprof/runtime  async runtime workers and alive tasks
/debug/pprof/process  memory, cpu, and uptime of the process
";

/// Exposes `prober` as `GET /healthz` and `GET /healthz/{probe}`.
///
/// The aggregate endpoint answers 200 when every check passes and 503
/// otherwise; both carry the results as JSON. The server also flips the
/// prober's readiness to not-ready when it starts draining.
pub fn with_prober(prober: Prober) -> HttpOption {
    with_attach(move |registrar: &mut HttpRegistrar| {
        registrar.set_prober(prober.clone())?;

        let all = prober.clone();
        registrar.get("/healthz", move |_req, _params| health_all(all.clone()))?;

        let single = prober.clone();
        registrar.get("/healthz/{probe}", move |_req, params| {
            health_one(single.clone(), params)
        })
    })
}

/// Exposes `registry` as `GET /metrics` in Prometheus text format.
pub fn with_metrics(registry: &'static MetricsRegistry) -> HttpOption {
    with_attach(move |registrar: &mut HttpRegistrar| {
        registrar.get("/metrics", move |_req, _params| scrape(registry))
    })
}

/// Exposes runtime diagnostics under `/debug/pprof/`.
pub fn with_profiler() -> HttpOption {
    let process = Arc::new(ProcessCollector::new());
    with_attach(move |registrar: &mut HttpRegistrar| {
        registrar.get("/debug/pprof/", |_req, _params| async {
            Ok::<_, RequestError>(text(StatusCode::OK, PPROF_INDEX))
        })?;
        registrar.get("/debug/pprof/cmdline", |_req, _params| cmdline())?;
        registrar.get("/debug/pprof/runtime", |_req, _params| runtime())?;

        let process = Arc::clone(&process);
        registrar.get("/debug/pprof/process", move |_req, _params| {
            process_info(Arc::clone(&process))
        })
    })
}

/// Exposes `GET /log/level` and `PUT /log/level` backed by `handle`.
///
/// `PUT` takes `{"level": "debug"}`; an unknown level is a 400.
pub fn with_log_control(handle: LogLevelHandle) -> HttpOption {
    with_attach(move |registrar: &mut HttpRegistrar| {
        let reader = handle.clone();
        registrar.get("/log/level", move |_req, _params| {
            let level = reader.level();
            async move { json(StatusCode::OK, &LevelBody { level }) }
        })?;

        let writer = handle.clone();
        registrar.put("/log/level", move |req, _params| set_level(writer.clone(), req))
    })
}

async fn checked<T, F>(check: F) -> Result<T, RequestError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::time::timeout(PROBE_TIMEOUT, tokio::task::spawn_blocking(check)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RequestError::internal(format!("probe failed: {e}"))),
        Err(_) => Err(RequestError::unavailable("probe timed out")),
    }
}

fn probe_status(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn health_all(prober: Prober) -> Result<Response, RequestError> {
    let report = checked(move || prober.report()).await?;
    json(probe_status(report.healthy), &report)
}

#[derive(Serialize)]
struct SingleProbe {
    name: String,
    #[serde(flatten)]
    result: ProbeResult,
}

async fn health_one(prober: Prober, params: RouteParams) -> Result<Response, RequestError> {
    let name = params.get("probe").unwrap_or_default().to_string();
    let lookup = name.clone();
    let result = checked(move || prober.check(&lookup))
        .await?
        .ok_or_else(|| RequestError::not_found(format!("unknown probe `{name}`")))?;

    json(probe_status(result.healthy), &SingleProbe { name, result })
}

async fn scrape(registry: &'static MetricsRegistry) -> Result<Response, RequestError> {
    // Collectors refresh process stats, which blocks.
    let body = checked(move || registry.render()).await?;
    Ok(respond(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body.into()))
}

async fn cmdline() -> Result<Response, RequestError> {
    let args: Vec<String> = std::env::args().collect();
    Ok(text(StatusCode::OK, args.join("\0")))
}

async fn runtime() -> Result<Response, RequestError> {
    let snapshot =
        runtime_snapshot().ok_or_else(|| RequestError::unavailable("no runtime information"))?;
    json(StatusCode::OK, &snapshot)
}

async fn process_info(collector: Arc<ProcessCollector>) -> Result<Response, RequestError> {
    let snapshot = checked(move || collector.snapshot())
        .await?
        .ok_or_else(|| RequestError::unavailable("no process information"))?;
    json(StatusCode::OK, &snapshot)
}

#[derive(Serialize)]
struct LevelBody {
    level: LogLevel,
}

#[derive(Deserialize)]
struct LevelChange {
    level: String,
}

async fn set_level(handle: LogLevelHandle, request: Request) -> Result<Response, RequestError> {
    let change: LevelChange = serde_json::from_slice(request.body())?;
    let level: LogLevel = change
        .level
        .parse()
        .map_err(|e: keel_telemetry::TelemetryError| RequestError::bad_request(e.to_string()))?;
    handle
        .set_level(level)
        .map_err(|e| RequestError::internal(e.to_string()))?;

    json(StatusCode::OK, &LevelBody { level })
}
