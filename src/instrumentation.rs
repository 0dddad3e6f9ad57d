/*!
 * Instrumentation for tracking agent-facing operation statistics
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ErrorCategory, PulsarError};

/// The agent-facing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    EnrollAgent,
    AuthenticateHost,
    GetClientConfig,
    GetDistributedQueries,
    SubmitDistributedQueryResults,
    SubmitStatusLogs,
    SubmitResultLogs,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::EnrollAgent,
        Operation::AuthenticateHost,
        Operation::GetClientConfig,
        Operation::GetDistributedQueries,
        Operation::SubmitDistributedQueryResults,
        Operation::SubmitStatusLogs,
        Operation::SubmitResultLogs,
    ];

    /// Method name used in request logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::EnrollAgent => "EnrollAgent",
            Operation::AuthenticateHost => "AuthenticateHost",
            Operation::GetClientConfig => "GetClientConfig",
            Operation::GetDistributedQueries => "GetDistributedQueries",
            Operation::SubmitDistributedQueryResults => "SubmitDistributedQueryResults",
            Operation::SubmitStatusLogs => "SubmitStatusLogs",
            Operation::SubmitResultLogs => "SubmitResultLogs",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct OperationCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
}

/// Thread-safe statistics tracker for the agent service
#[derive(Debug, Clone)]
pub struct ServiceStats {
    inner: Arc<ServiceStatsInner>,
}

#[derive(Debug)]
struct ServiceStatsInner {
    operations: [OperationCounters; 7],

    // Error categorization
    auth_errors: AtomicU64,
    not_found_errors: AtomicU64,
    exhausted_errors: AtomicU64,
    upstream_errors: AtomicU64,
    validation_errors: AtomicU64,
    config_errors: AtomicU64,

    // Per-entry result rejections (the call itself succeeded)
    rejected_results: AtomicU64,

    start_time: Instant,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServiceStatsInner {
                operations: Default::default(),
                auth_errors: AtomicU64::new(0),
                not_found_errors: AtomicU64::new(0),
                exhausted_errors: AtomicU64::new(0),
                upstream_errors: AtomicU64::new(0),
                validation_errors: AtomicU64::new(0),
                config_errors: AtomicU64::new(0),
                rejected_results: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    /// Record a successful call
    pub fn record_success(&self, op: Operation, took_micros: u64) {
        let counters = &self.inner.operations[op.index()];
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters.total_micros.fetch_add(took_micros, Ordering::Relaxed);
    }

    /// Record a failed call
    pub fn record_failure(&self, op: Operation, error: &PulsarError, took_micros: u64) {
        let counters = &self.inner.operations[op.index()];
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters.failures.fetch_add(1, Ordering::Relaxed);
        counters.total_micros.fetch_add(took_micros, Ordering::Relaxed);

        let bucket = match error.category() {
            ErrorCategory::Auth => &self.inner.auth_errors,
            ErrorCategory::NotFound => &self.inner.not_found_errors,
            ErrorCategory::ResourceExhausted => &self.inner.exhausted_errors,
            ErrorCategory::Upstream => &self.inner.upstream_errors,
            ErrorCategory::Validation => &self.inner.validation_errors,
            ErrorCategory::Configuration => &self.inner.config_errors,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    /// Record result entries rejected inside an otherwise successful submission
    pub fn record_rejections(&self, count: usize) {
        self.inner
            .rejected_results
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> StatsSnapshot {
        let operations = Operation::ALL
            .iter()
            .map(|op| {
                let counters = &self.inner.operations[op.index()];
                (
                    op.as_str().to_string(),
                    OperationSnapshot {
                        calls: counters.calls.load(Ordering::Relaxed),
                        failures: counters.failures.load(Ordering::Relaxed),
                        total_micros: counters.total_micros.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        StatsSnapshot {
            operations,
            auth_errors: self.inner.auth_errors.load(Ordering::Relaxed),
            not_found_errors: self.inner.not_found_errors.load(Ordering::Relaxed),
            exhausted_errors: self.inner.exhausted_errors.load(Ordering::Relaxed),
            upstream_errors: self.inner.upstream_errors.load(Ordering::Relaxed),
            validation_errors: self.inner.validation_errors.load(Ordering::Relaxed),
            config_errors: self.inner.config_errors.load(Ordering::Relaxed),
            rejected_results: self.inner.rejected_results.load(Ordering::Relaxed),
            elapsed_secs: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Check if any calls have been recorded
    pub fn has_activity(&self) -> bool {
        self.inner
            .operations
            .iter()
            .any(|c| c.calls.load(Ordering::Relaxed) > 0)
    }
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub total_micros: u64,
}

impl OperationSnapshot {
    pub fn avg_micros(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_micros / self.calls
        }
    }
}

/// Immutable snapshot of statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub operations: BTreeMap<String, OperationSnapshot>,
    pub auth_errors: u64,
    pub not_found_errors: u64,
    pub exhausted_errors: u64,
    pub upstream_errors: u64,
    pub validation_errors: u64,
    pub config_errors: u64,
    pub rejected_results: u64,
    pub elapsed_secs: u64,
}

impl StatsSnapshot {
    pub fn operation(&self, op: Operation) -> OperationSnapshot {
        self.operations
            .get(op.as_str())
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> u64 {
        self.operations.values().map(|o| o.calls).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.operations.values().map(|o| o.failures).sum()
    }

    /// Format statistics as a human-readable string
    pub fn format_summary(&self) -> String {
        let mut out = format!(
            "Calls: {} total, {} failed, {} rejected result entries\n\
             Errors: {} auth, {} not found, {} exhausted, {} upstream, {} validation, {} config\n\
             Elapsed: {} seconds",
            self.total_calls(),
            self.total_failures(),
            self.rejected_results,
            self.auth_errors,
            self.not_found_errors,
            self.exhausted_errors,
            self.upstream_errors,
            self.validation_errors,
            self.config_errors,
            self.elapsed_secs
        );
        for (name, op) in self.operations.iter().filter(|(_, op)| op.calls > 0) {
            out.push_str(&format!(
                "\n  {}: {} calls, {} failed, {}us avg",
                name,
                op.calls,
                op.failures,
                op.avg_micros()
            ));
        }
        out
    }
}
