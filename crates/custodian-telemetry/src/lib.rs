//! Custodian Telemetry
//!
//! Audit and metrics functionality for policy runs.
//!
//! Provides:
//! - Hash-chained audit trails of every action invocation
//! - Run counters exported through the `metrics` facade

pub mod audit;
pub mod metrics;

pub use audit::{AuditEvent, AuditSeverity, AuditTrail};
pub use metrics::{MetricsCollector, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditSeverity, AuditTrail};
    pub use crate::metrics::MetricsCollector;
}
