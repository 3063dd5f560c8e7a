//! Run metrics collection and reporting
//!
//! [`MetricsCollector`] keeps an in-process snapshot for run reports and
//! forwards every increment to the `metrics` facade, so an exporter
//! installed by the binary sees the same numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const RESOURCES_FETCHED: &str = "custodian_resources_fetched_total";
pub const RESOURCES_MATCHED: &str = "custodian_resources_matched_total";
pub const ACTION_INVOCATIONS: &str = "custodian_action_invocations_total";
pub const ACTION_FAILURES: &str = "custodian_action_failures_total";
pub const REMOTE_CALLS: &str = "custodian_remote_calls_total";
pub const REMOTE_FAILURES: &str = "custodian_remote_failures_total";

/// Register metric descriptions with the installed recorder
pub fn describe() {
    ::metrics::describe_counter!(RESOURCES_FETCHED, "Resources returned by the resource source");
    ::metrics::describe_counter!(RESOURCES_MATCHED, "Resources matched by policy filters");
    ::metrics::describe_counter!(ACTION_INVOCATIONS, "Action invocations by policy and type");
    ::metrics::describe_counter!(ACTION_FAILURES, "Actions aborted by a fatal provider error");
    ::metrics::describe_counter!(REMOTE_CALLS, "Remote data queries issued by filters");
    ::metrics::describe_counter!(REMOTE_FAILURES, "Remote data units excluded after failure");
}

/// Record one remote data query
pub fn record_remote_call(filter_type: &str) {
    ::metrics::counter!(REMOTE_CALLS, "filter" => filter_type.to_string()).increment(1);
}

/// Record one failed remote data unit
pub fn record_remote_failure(filter_type: &str) {
    ::metrics::counter!(REMOTE_FAILURES, "filter" => filter_type.to_string()).increment(1);
}

/// Metrics collector for policy runs
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    resources_fetched: AtomicU64,
    resources_matched: AtomicU64,
    action_invocations: AtomicU64,
    action_failures: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                resources_fetched: AtomicU64::new(0),
                resources_matched: AtomicU64::new(0),
                action_invocations: AtomicU64::new(0),
                action_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Record resources fetched for a policy
    pub fn record_fetched(&self, policy: &str, count: u64) {
        self.inner.resources_fetched.fetch_add(count, Ordering::Relaxed);
        ::metrics::counter!(RESOURCES_FETCHED, "policy" => policy.to_string()).increment(count);
    }

    /// Record resources matched by a policy
    pub fn record_matched(&self, policy: &str, count: u64) {
        self.inner.resources_matched.fetch_add(count, Ordering::Relaxed);
        ::metrics::counter!(RESOURCES_MATCHED, "policy" => policy.to_string()).increment(count);
    }

    /// Record an action invocation
    pub fn record_action(&self, policy: &str, action: &str) {
        self.inner.action_invocations.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(
            ACTION_INVOCATIONS,
            "policy" => policy.to_string(),
            "action" => action.to_string()
        )
        .increment(1);
    }

    /// Record an action aborted by a fatal error
    pub fn record_action_failure(&self, policy: &str, action: &str) {
        self.inner.action_failures.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(
            ACTION_FAILURES,
            "policy" => policy.to_string(),
            "action" => action.to_string()
        )
        .increment(1);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            resources_fetched: self.inner.resources_fetched.load(Ordering::Relaxed),
            resources_matched: self.inner.resources_matched.load(Ordering::Relaxed),
            action_invocations: self.inner.action_invocations.load(Ordering::Relaxed),
            action_failures: self.inner.action_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub resources_fetched: u64,
    pub resources_matched: u64,
    pub action_invocations: u64,
    pub action_failures: u64,
}

impl MetricsSnapshot {
    /// Fraction of fetched resources that matched
    pub fn match_rate(&self) -> f64 {
        if self.resources_fetched == 0 {
            0.0
        } else {
            self.resources_matched as f64 / self.resources_fetched as f64
        }
    }
}
