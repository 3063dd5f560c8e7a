//! Custodian remote-data filters
//!
//! Filters whose match depends on data fetched from another service:
//! - `metric`: an aggregated monitoring time series per resource
//! - `stackdriver-logs`: log entries selected by a per-resource filter
//!
//! Both fetch through a bounded [`WorkerPool`], cache what they fetched
//! on the resource, and isolate failures so one bad unit of work only
//! excludes its own resources.

pub mod logs;
pub mod metric;
pub mod pool;

use custodian_core::Result;
use custodian_policy::FilterRegistry;

pub use logs::LogsFilter;
pub use metric::{MetricFilter, NoDataAction};
pub use pool::{restore_order, WorkerPool};

/// Add the remote-data filters to `registry`
pub fn register_filters(registry: &mut FilterRegistry) -> Result<()> {
    registry.register("metric", metric::schema(), metric::factory)?;
    registry.register("stackdriver-logs", logs::schema(), logs::factory)?;
    Ok(())
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::logs::LogsFilter;
    pub use crate::metric::MetricFilter;
    pub use crate::register_filters;
}
