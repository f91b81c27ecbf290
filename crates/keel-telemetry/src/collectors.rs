//! Default collectors.
//!
//! A [`Collector`] refreshes a group of gauges right before the registry is
//! rendered. The registry always carries a [`RuntimeCollector`] and a
//! [`ProcessCollector`]; services may add their own.

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// A set of gauges refreshed on every scrape.
pub trait Collector: Send + Sync + 'static {
    /// Unique collector name.
    fn name(&self) -> &'static str;

    /// Updates the collector's metrics through the `metrics` facade.
    fn collect(&self);
}

/// Tokio runtime figures at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeSnapshot {
    /// Worker threads of the runtime.
    pub workers: usize,
    /// Tasks spawned and not yet completed.
    pub alive_tasks: usize,
}

/// Reads the current tokio runtime, if called from within one.
#[must_use]
pub fn runtime_snapshot() -> Option<RuntimeSnapshot> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let metrics = handle.metrics();
    Some(RuntimeSnapshot {
        workers: metrics.num_workers(),
        alive_tasks: metrics.num_alive_tasks(),
    })
}

/// Publishes tokio runtime gauges.
#[derive(Debug, Default)]
pub struct RuntimeCollector;

impl Collector for RuntimeCollector {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn collect(&self) {
        if let Some(snapshot) = runtime_snapshot() {
            metrics::gauge!("keel_runtime_workers").set(snapshot.workers as f64);
            metrics::gauge!("keel_runtime_alive_tasks").set(snapshot.alive_tasks as f64);
        }
    }
}

/// Resource usage of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    /// Process id.
    pub pid: u32,
    /// Resident set size in bytes.
    pub resident_memory_bytes: u64,
    /// Virtual memory size in bytes.
    pub virtual_memory_bytes: u64,
    /// CPU usage since the previous refresh, in percent of one core.
    pub cpu_usage_percent: f32,
    /// Start time in seconds since the Unix epoch.
    pub start_time_seconds: u64,
    /// Seconds the process has been running.
    pub run_time_seconds: u64,
}

/// Publishes process resource gauges.
///
/// CPU usage is computed between consecutive refreshes, so the first scrape
/// reports zero.
pub struct ProcessCollector {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessCollector {
    /// Creates a collector for the current process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }

    /// Refreshes and returns the current process figures.
    #[must_use]
    pub fn snapshot(&self) -> Option<ProcessSnapshot> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system.process(pid)?;

        Some(ProcessSnapshot {
            pid: pid.as_u32(),
            resident_memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
            cpu_usage_percent: process.cpu_usage(),
            start_time_seconds: process.start_time(),
            run_time_seconds: process.run_time(),
        })
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCollector")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &'static str {
        "process"
    }

    fn collect(&self) {
        let Some(snapshot) = self.snapshot() else {
            return;
        };
        metrics::gauge!("process_resident_memory_bytes").set(snapshot.resident_memory_bytes as f64);
        metrics::gauge!("process_virtual_memory_bytes").set(snapshot.virtual_memory_bytes as f64);
        metrics::gauge!("process_cpu_usage_percent").set(f64::from(snapshot.cpu_usage_percent));
        metrics::gauge!("process_start_time_seconds").set(snapshot.start_time_seconds as f64);
    }
}

/// Reads the current process figures with a one-off collector.
#[must_use]
pub fn process_snapshot() -> Option<ProcessSnapshot> {
    ProcessCollector::new().snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_snapshot_outside_runtime() {
        assert!(runtime_snapshot().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runtime_snapshot_inside_runtime() {
        let snapshot = runtime_snapshot().unwrap();
        assert_eq!(snapshot.workers, 2);
    }

    #[test]
    fn test_process_snapshot() {
        let snapshot = process_snapshot().unwrap();
        assert_eq!(snapshot.pid, std::process::id());
        assert!(snapshot.resident_memory_bytes > 0);
    }

    #[test]
    fn test_collector_names() {
        assert_eq!(RuntimeCollector.name(), "runtime");
        assert_eq!(ProcessCollector::new().name(), "process");
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = RuntimeSnapshot {
            workers: 4,
            alive_tasks: 12,
        };
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["workers"], 4);
        assert_eq!(json["alive_tasks"], 12);
    }
}
