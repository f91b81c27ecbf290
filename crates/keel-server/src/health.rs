//! Health probes.
//!
//! A [`Prober`] is a named set of check functions shared between servers. The
//! HTTP flavour exposes it through [`with_prober`](crate::http::with_prober):
//!
//! - `GET /healthz` runs every check and answers 200 only if all pass
//! - `GET /healthz/{name}` runs a single check, 404 if it is unknown
//!
//! # Example
//!
//! ```
//! use keel_server::{ProbeResult, Prober};
//!
//! let prober = Prober::new();
//! prober.register("database", || ProbeResult::healthy()).unwrap();
//! prober.register("cache", || ProbeResult::unhealthy("connection refused")).unwrap();
//!
//! assert!(!prober.is_healthy());
//! assert_eq!(prober.check("cache").unwrap().detail, "connection refused");
//! assert!(prober.check("queue").is_none());
//! ```

use chrono::{DateTime, Utc};
use keel_core::RegistrationConflict;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name of the built-in readiness probe toggled by [`Prober::ready`] and
/// [`Prober::not_ready`].
pub const READINESS_PROBE: &str = "readiness";

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Whether the check passed.
    pub healthy: bool,
    /// Human readable explanation, usually empty when healthy.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl ProbeResult {
    /// A passing result.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: String::new(),
        }
    }

    /// A failing result with an explanation.
    #[must_use]
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

impl From<bool> for ProbeResult {
    fn from(healthy: bool) -> Self {
        if healthy {
            Self::healthy()
        } else {
            Self::unhealthy("check failed")
        }
    }
}

/// Every check's result at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Conjunction of every result.
    pub healthy: bool,
    /// When the checks ran.
    pub checked_at: DateTime<Utc>,
    /// Results by probe name.
    pub probes: BTreeMap<String, ProbeResult>,
}

/// A check function. Must be safe to call concurrently and must return.
pub type ProbeFn = Arc<dyn Fn() -> ProbeResult + Send + Sync>;

/// Named health checks.
///
/// Clones share the same set of checks.
#[derive(Clone, Default)]
pub struct Prober {
    checks: Arc<RwLock<BTreeMap<String, ProbeFn>>>,
    readiness: Arc<RwLock<Option<ProbeResult>>>,
}

impl Prober {
    /// Creates a prober with no checks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `check` under `name`.
    ///
    /// A name can only be registered once.
    pub fn register<F>(&self, name: impl Into<String>, check: F) -> Result<(), RegistrationConflict>
    where
        F: Fn() -> ProbeResult + Send + Sync + 'static,
    {
        let name = name.into();
        let mut checks = self.checks.write();
        if checks.contains_key(&name) {
            return Err(RegistrationConflict::new("probe", name));
        }
        checks.insert(name, Arc::new(check));
        Ok(())
    }

    /// Runs the check registered as `name`.
    ///
    /// For [`READINESS_PROBE`] the built-in state, once set, is combined with
    /// any user check of that name: both must pass.
    #[must_use]
    pub fn check(&self, name: &str) -> Option<ProbeResult> {
        // Run outside the lock so slow checks never block registration.
        let check = self.checks.read().get(name).cloned();
        let user = check.map(|check| check());
        if name == READINESS_PROBE {
            return merge_readiness(self.readiness.read().clone(), user);
        }
        user
    }

    /// Runs every check.
    #[must_use]
    pub fn check_all(&self) -> BTreeMap<String, ProbeResult> {
        let checks: Vec<(String, ProbeFn)> = self
            .checks
            .read()
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        let mut results: BTreeMap<String, ProbeResult> = checks
            .into_iter()
            .map(|(name, check)| (name, check()))
            .collect();

        let user = results.remove(READINESS_PROBE);
        if let Some(readiness) = merge_readiness(self.readiness.read().clone(), user) {
            results.insert(READINESS_PROBE.to_string(), readiness);
        }
        results
    }

    /// Runs every check and stamps the result.
    #[must_use]
    pub fn report(&self) -> ProbeReport {
        let probes = self.check_all();
        ProbeReport {
            healthy: probes.values().all(|result| result.healthy),
            checked_at: Utc::now(),
            probes,
        }
    }

    /// Returns `true` if every check passes. An empty prober is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.check_all().values().all(|result| result.healthy)
    }

    /// Returns the registered probe names in order, including the built-in
    /// readiness probe once it has been set.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.checks.read().keys().cloned().collect();
        if self.readiness.read().is_some() && !names.iter().any(|n| n == READINESS_PROBE) {
            names.push(READINESS_PROBE.to_string());
            names.sort();
        }
        names
    }

    /// Marks the service ready.
    pub fn ready(&self) {
        *self.readiness.write() = Some(ProbeResult::healthy());
    }

    /// Marks the service not ready, e.g. while draining.
    pub fn not_ready(&self, detail: impl Into<String>) {
        *self.readiness.write() = Some(ProbeResult::unhealthy(detail));
    }
}

fn merge_readiness(builtin: Option<ProbeResult>, user: Option<ProbeResult>) -> Option<ProbeResult> {
    match (builtin, user) {
        (Some(builtin), _) if !builtin.healthy => Some(builtin),
        (builtin, user) => user.or(builtin),
    }
}

impl fmt::Debug for Prober {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prober")
            .field("checks", &self.names())
            .finish_non_exhaustive()
    }
}
