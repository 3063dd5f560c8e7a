//! Filter resources on a monitoring metric aggregated over a time window
//!
//! ```yaml
//! filters:
//!   - type: metric
//!     metric: compute.googleapis.com/instance/cpu/utilization
//!     op: lt
//!     threshold: 0.05
//!     timeframe: 72
//!     no_data_action: include
//! ```
//!
//! Uncached resources are queried in chunks, one `timeSeries.list` call per
//! chunk selecting every id of the chunk. The aggregated value is cached on
//! each resource under `c7n:metrics`, keyed by every parameter that changes
//! the fetched data, so an identical filter later in the run costs nothing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use custodian_core::{ApiRequest, Error, Resource, Result};
use custodian_policy::filters::Filter;
use custodian_policy::schema::type_schema;
use custodian_policy::{FilterRegistry, ResourceManager, ValueFilter};
use custodian_telemetry::metrics::{record_remote_call, record_remote_failure};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::pool::{restore_order, WorkerPool};

/// Annotation namespace for cached metric values
pub const ANNOTATION: &str = "metrics";

pub const ALIGNERS: &[&str] = &[
    "none",
    "delta",
    "rate",
    "interpolate",
    "next_older",
    "min",
    "max",
    "mean",
    "count",
    "sum",
    "stddev",
    "count_true",
    "count_false",
    "fraction_true",
    "percentile_99",
    "percentile_95",
    "percentile_50",
    "percentile_05",
    "percent_change",
];

pub const REDUCERS: &[&str] = &[
    "none",
    "mean",
    "min",
    "max",
    "sum",
    "stddev",
    "count",
    "count_true",
    "count_false",
    "fraction_true",
    "percentile_99",
    "percentile_95",
    "percentile_50",
    "percentile_05",
];

/// What to do with a resource that has no datapoints in the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDataAction {
    Include,
    Exclude,
}

/// Compare an aggregated metric against a threshold
#[derive(Debug, Clone)]
pub struct MetricFilter {
    manager: ResourceManager,
    metric: String,
    comparison: ValueFilter,
    timeframe_hours: f64,
    aligner: String,
    aggregation: String,
    extra_filter: Option<String>,
    no_data_action: NoDataAction,
    resource_label: String,
    pool: WorkerPool,
}

impl MetricFilter {
    pub fn from_data(data: &Value, manager: &ResourceManager) -> Result<Self> {
        let str_field = |name: &str, default: &str| {
            data.get(name)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        let mut comparison = Map::new();
        for (from, to) in [("op", "op"), ("threshold", "value")] {
            if let Some(v) = data.get(from) {
                comparison.insert(to.to_string(), v.clone());
            }
        }
        let comparison = ValueFilter::from_data("metric", &Value::Object(comparison))?;

        let no_data_action = match data.get("no_data_action").and_then(Value::as_str) {
            None | Some("exclude") => NoDataAction::Exclude,
            Some("include") => NoDataAction::Include,
            Some(other) => {
                return Err(Error::validation(
                    "metric",
                    "no_data_action",
                    format!("expected include or exclude, got '{}'", other),
                ))
            }
        };

        let defaults = manager.config().metrics;
        let pool = WorkerPool::new(
            data.get("batch_size")
                .and_then(Value::as_u64)
                .map_or(defaults.batch_size, |n| n as usize),
            data.get("max_workers")
                .and_then(Value::as_u64)
                .map_or(defaults.max_workers, |n| n as usize),
        );

        Ok(Self {
            manager: manager.clone(),
            metric: str_field("metric", ""),
            comparison,
            timeframe_hours: data.get("timeframe").and_then(Value::as_f64).unwrap_or(24.0),
            aligner: str_field("aligner", "mean"),
            aggregation: str_field("aggregation", "mean"),
            extra_filter: data.get("filter").and_then(Value::as_str).map(String::from),
            no_data_action,
            resource_label: str_field("resource_label", "instance_id"),
            pool,
        })
    }

    /// Annotation key identifying this filter's fetched data
    pub fn cache_key(&self) -> String {
        format!(
            "metric: {}, aggregation: {}, aligner: {}, timeframe: {}, filter: {}",
            self.metric,
            self.aggregation,
            self.aligner,
            self.timeframe_hours,
            self.extra_filter.as_deref().unwrap_or_default()
        )
    }

    /// Query filter selecting every id of a chunk
    fn query(&self, ids: &[String]) -> String {
        let quoted: Vec<String> = ids.iter().map(|id| format!("\"{}\"", id)).collect();
        let mut query = format!(
            "metric.type = \"{}\" AND resource.labels.{} = one_of({})",
            self.metric,
            self.resource_label,
            quoted.join(", ")
        );
        if let Some(extra) = &self.extra_filter {
            query.push_str(&format!(" AND ({})", extra));
        }
        query
    }

    fn request(&self, ids: &[String], start: DateTime<Utc>, end: DateTime<Utc>) -> ApiRequest {
        let project = self.manager.client().default_scope().unwrap_or_default();
        let period = (end - start).num_seconds().max(1);
        ApiRequest::new(
            "monitoring",
            "projects.timeSeries.list",
            json!({
                "name": format!("projects/{}", project),
                "filter": self.query(ids),
                "interval_startTime": start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "interval_endTime": end.to_rfc3339_opts(SecondsFormat::Secs, true),
                "aggregation_alignmentPeriod": format!("{}s", period),
                "aggregation_perSeriesAligner": format!("ALIGN_{}", self.aligner.to_uppercase()),
                "aggregation_crossSeriesReducer": format!("REDUCE_{}", self.aggregation.to_uppercase()),
                "aggregation_groupByFields": format!("resource.labels.{}", self.resource_label),
            }),
        )
    }

    /// Fetch and cache values for one chunk; failed resources are dropped
    async fn fetch_chunk(
        &self,
        chunk: Vec<Resource>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Resource> {
        let mut with_ids = Vec::with_capacity(chunk.len());
        for resource in chunk {
            match self.manager.resource_id(&resource) {
                Ok(id) => with_ids.push((id, resource)),
                Err(e) => warn!(error = %e, "Skipping resource without id"),
            }
        }
        let ids: Vec<String> = with_ids.iter().map(|(id, _)| id.clone()).collect();

        record_remote_call("metric");
        let response = match self
            .manager
            .execute_with_retry(self.request(&ids, start, end))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    metric = %self.metric,
                    resources = ids.len(),
                    error = %e,
                    "Metric query failed, excluding chunk"
                );
                record_remote_failure("metric");
                return Vec::new();
            }
        };

        let mut values = self.collect_values(&response);
        let key = self.cache_key();
        let mut fetched = Vec::with_capacity(with_ids.len());
        for (id, mut resource) in with_ids {
            let value = match values.remove(&id) {
                None => Value::Null,
                Some(SeriesValue::Single(v)) => v,
                Some(SeriesValue::Ambiguous) => {
                    warn!(
                        metric = %self.metric,
                        resource = %id,
                        "Metric returned more than one series or point, excluding resource"
                    );
                    record_remote_failure("metric");
                    continue;
                }
            };
            resource.annotate(ANNOTATION, key.clone(), value);
            fetched.push(resource);
        }
        fetched
    }

    /// Aggregated value per resource id
    fn collect_values(&self, response: &Value) -> HashMap<String, SeriesValue> {
        let mut values = HashMap::new();
        let series = response
            .get("timeSeries")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for s in series {
            let id = s
                .pointer(&format!("/resource/labels/{}", self.resource_label))
                .or_else(|| s.pointer(&format!("/metric/labels/{}", self.resource_label)))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
            let Some(id) = id else {
                debug!(metric = %self.metric, "Series without resource label");
                continue;
            };

            let points = s.get("points").and_then(Value::as_array);
            let value = match points.map(Vec::as_slice) {
                Some([point]) => point_value(point)
                    .map(SeriesValue::Single)
                    .unwrap_or(SeriesValue::Ambiguous),
                Some([]) | None => continue,
                Some(_) => SeriesValue::Ambiguous,
            };

            values
                .entry(id)
                .and_modify(|v| *v = SeriesValue::Ambiguous)
                .or_insert(value);
        }
        values
    }

    fn matches(&self, resource: &Resource) -> bool {
        match resource.annotation_entry(ANNOTATION, &self.cache_key()) {
            Some(Value::Null) | None => self.no_data_action == NoDataAction::Include,
            Some(value) => self.comparison.compare(Some(value), resource),
        }
    }
}

enum SeriesValue {
    Single(Value),
    /// More than one series or point for the same resource
    Ambiguous,
}

/// Numeric value of a point; int64 values arrive as strings
fn point_value(point: &Value) -> Option<Value> {
    let typed = point.get("value")?.as_object()?.values().next()?;
    match typed {
        Value::Number(_) => Some(typed.clone()),
        Value::String(s) => s.parse::<f64>().ok().map(Value::from),
        Value::Bool(b) => Some(Value::from(u8::from(*b))),
        _ => None,
    }
}

#[async_trait]
impl Filter for MetricFilter {
    fn filter_type(&self) -> &str {
        "metric"
    }

    fn validate(&self) -> Result<()> {
        if self.metric.is_empty() {
            return Err(Error::validation("metric", "metric", "required"));
        }
        let op = self.comparison.op();
        if op.is_presence() || op.takes_list() || op.takes_pattern() {
            return Err(Error::validation(
                "metric",
                "op",
                format!("{} cannot compare a metric value", op),
            ));
        }
        if self.timeframe_hours <= 0.0 {
            return Err(Error::validation("metric", "timeframe", "must be positive"));
        }
        if !ALIGNERS.contains(&self.aligner.as_str()) {
            return Err(Error::validation(
                "metric",
                "aligner",
                format!("unknown aligner '{}'", self.aligner),
            ));
        }
        if !REDUCERS.contains(&self.aggregation.as_str()) {
            return Err(Error::validation(
                "metric",
                "aggregation",
                format!("unknown aggregation '{}'", self.aggregation),
            ));
        }
        self.comparison.validate_comparison()
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let id_field = self.manager.id_field();
        let ids: Vec<String> = resources.iter().filter_map(|r| r.id(id_field)).collect();

        let end = Utc::now();
        let start = end - Duration::seconds((self.timeframe_hours * 3600.0) as i64);

        let key = self.cache_key();
        let (cached, uncached): (Vec<Resource>, Vec<Resource>) = resources
            .into_iter()
            .partition(|r| r.annotation_entry(ANNOTATION, &key).is_some());
        debug!(
            metric = %self.metric,
            cached = cached.len(),
            uncached = uncached.len(),
            "Resolving metric values"
        );

        let mut annotated = cached;
        if !uncached.is_empty() {
            annotated.extend(
                self.pool
                    .run(uncached, |chunk| self.fetch_chunk(chunk, start, end))
                    .await,
            );
        }

        Ok(restore_order(&ids, annotated, id_field)
            .into_iter()
            .filter(|r| self.matches(r))
            .collect())
    }
}

pub(crate) fn schema() -> Value {
    type_schema(
        "metric",
        json!({
            "metric": { "type": "string" },
            "op": { "enum": ["eq", "equal", "==", "ne", "not-equal", "!=", "gt", "greater-than", ">",
                             "ge", "gte", ">=", "lt", "less-than", "<", "le", "lte", "<="] },
            "threshold": { "type": "number" },
            "timeframe": { "type": "number", "exclusiveMinimum": 0 },
            "aligner": { "enum": ALIGNERS },
            "aggregation": { "enum": REDUCERS },
            "filter": { "type": "string" },
            "no_data_action": { "enum": ["include", "exclude"] },
            "resource_label": { "type": "string" },
            "batch_size": { "type": "integer", "minimum": 1 },
            "max_workers": { "type": "integer", "minimum": 1 },
        }),
        &["metric", "op", "threshold"],
    )
}

pub(crate) fn factory(
    data: &Value,
    _registry: &FilterRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    Ok(Arc::new(MetricFilter::from_data(data, manager)?))
}
