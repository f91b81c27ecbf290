//! The process-wide metrics registry.
//!
//! [`init_metrics`] builds a Prometheus recorder, installs it as the global
//! `metrics` recorder and registers the default collectors. It runs at most
//! once per process; every call returns the same `&'static` registry.
//!
//! After initialization, every `metrics::counter!`, `gauge!` and `histogram!`
//! in the process records into this registry.

use crate::collectors::{Collector, ProcessCollector, RuntimeCollector};
use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use std::fmt;
use std::sync::OnceLock;

static REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();

/// Default histogram buckets: 1ms up to 10s.
const DURATION_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Initializes the process-wide registry, or returns the existing one.
///
/// Safe to call concurrently: exactly one caller performs the setup and the
/// default collectors are registered once.
pub fn init_metrics() -> &'static MetricsRegistry {
    REGISTRY.get_or_init(MetricsRegistry::install)
}

/// Process-wide collector set exposed for scraping.
pub struct MetricsRegistry {
    handle: PrometheusHandle,
    collectors: RwLock<Vec<Box<dyn Collector>>>,
    global: bool,
}

impl MetricsRegistry {
    /// Returns the registry if [`init_metrics`] has run.
    pub fn global() -> Option<&'static Self> {
        REGISTRY.get()
    }

    fn install() -> Self {
        let builder = PrometheusBuilder::new();
        let builder = match builder.set_buckets(&DURATION_BUCKETS) {
            Ok(builder) => builder,
            Err(err) => {
                tracing::warn!(error = %err, "invalid histogram buckets, using summaries");
                PrometheusBuilder::new()
            }
        };

        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        let global = match metrics::set_global_recorder(recorder) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "a global metrics recorder is already installed");
                false
            }
        };

        describe_metrics();

        let registry = Self {
            handle,
            collectors: RwLock::new(Vec::new()),
            global,
        };
        registry.push_collector(Box::new(RuntimeCollector));
        registry.push_collector(Box::new(ProcessCollector::new()));

        tracing::debug!(global, "metrics registry initialized");
        registry
    }

    fn push_collector(&self, collector: Box<dyn Collector>) {
        self.collectors.write().push(collector);
    }

    /// Adds a domain collector.
    ///
    /// Register collectors before any server starts serving `/metrics`.
    pub fn register_collector(&self, collector: impl Collector) -> TelemetryResult<()> {
        let mut collectors = self.collectors.write();
        if collectors.iter().any(|c| c.name() == collector.name()) {
            return Err(TelemetryError::DuplicateCollector(collector.name().to_string()));
        }
        collectors.push(Box::new(collector));
        Ok(())
    }

    /// Returns registered collector names in registration order.
    #[must_use]
    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.read().iter().map(|c| c.name()).collect()
    }

    /// Returns true when this registry is the global `metrics` recorder.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Refreshes every collector and renders the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        for collector in self.collectors.read().iter() {
            collector.collect();
        }
        self.handle.run_upkeep();
        self.handle.render()
    }

    /// Returns the underlying Prometheus handle.
    #[must_use]
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("collectors", &self.collector_names())
            .field("global", &self.global)
            .finish_non_exhaustive()
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "keel_requests_total",
        "Total number of requests handled by interceptor chains"
    );
    metrics::describe_histogram!(
        "keel_request_duration_seconds",
        metrics::Unit::Seconds,
        "Request duration in seconds"
    );
    metrics::describe_gauge!(
        "keel_requests_in_flight",
        "Number of requests currently being processed"
    );
    metrics::describe_gauge!(
        "keel_server_open_connections",
        "Number of connections currently open per server"
    );
    metrics::describe_counter!(
        "keel_server_forced_shutdowns_total",
        "Shutdowns whose grace period elapsed before in-flight work finished"
    );
    metrics::describe_gauge!("keel_runtime_workers", "Tokio runtime worker threads");
    metrics::describe_gauge!("keel_runtime_alive_tasks", "Tokio tasks alive");
    metrics::describe_gauge!(
        "process_resident_memory_bytes",
        metrics::Unit::Bytes,
        "Resident memory size in bytes"
    );
    metrics::describe_gauge!(
        "process_virtual_memory_bytes",
        metrics::Unit::Bytes,
        "Virtual memory size in bytes"
    );
    metrics::describe_gauge!("process_cpu_usage_percent", "Process CPU usage in percent");
    metrics::describe_gauge!(
        "process_start_time_seconds",
        metrics::Unit::Seconds,
        "Start time of the process since unix epoch in seconds"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Orders {
        collects: Arc<AtomicUsize>,
    }

    impl Collector for Orders {
        fn name(&self) -> &'static str {
            "orders"
        }

        fn collect(&self) {
            self.collects.fetch_add(1, Ordering::SeqCst);
            metrics::gauge!("orders_pending").set(3.0);
        }
    }

    #[test]
    fn test_concurrent_init_returns_one_registry() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| init_metrics() as *const MetricsRegistry as usize))
            .collect();
        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            MetricsRegistry::global().map(|r| r as *const MetricsRegistry as usize),
            Some(addresses[0])
        );

        let names = init_metrics().collector_names();
        assert_eq!(names.iter().filter(|n| **n == "runtime").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "process").count(), 1);
    }

    #[test]
    fn test_counters_render_through_global_recorder() {
        let registry = init_metrics();
        assert!(registry.is_global());

        metrics::counter!("registry_test_events_total").increment(1);
        metrics::counter!("registry_test_events_total").increment(1);

        let rendered = registry.render();
        assert!(
            rendered.lines().any(|l| l == "registry_test_events_total 2"),
            "{rendered}"
        );
        assert!(rendered.contains("process_resident_memory_bytes"));
    }

    #[test]
    fn test_domain_collector() {
        let registry = init_metrics();
        let collects = Arc::new(AtomicUsize::new(0));

        registry
            .register_collector(Orders {
                collects: Arc::clone(&collects),
            })
            .unwrap();
        let err = registry
            .register_collector(Orders {
                collects: Arc::clone(&collects),
            })
            .unwrap_err();
        assert!(matches!(err, TelemetryError::DuplicateCollector(name) if name == "orders"));

        let rendered = registry.render();
        assert!(collects.load(Ordering::SeqCst) >= 1);
        assert!(rendered.contains("orders_pending 3"));
    }
}
