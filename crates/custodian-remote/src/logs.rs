//! Filter resources on their log entries
//!
//! ```yaml
//! filters:
//!   - type: stackdriver-logs
//!     filter: 'resource.labels.instance_id="{resource[id]}" AND severity>=ERROR'
//!     filter_days: 7
//!     op: not-empty
//! ```
//!
//! The filter template is rendered per resource and restricted to the last
//! `filter_days` days. Entries are cached under `c7n:logs`, then matched
//! with value filter semantics where the key `filtered_logs` refers to the
//! fetched entries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use custodian_core::{ApiRequest, Error, Resource, Result};
use custodian_policy::filters::Filter;
use custodian_policy::schema::{type_schema, value_properties};
use custodian_policy::{FilterRegistry, ResourceManager, ValueFilter};
use custodian_telemetry::metrics::{record_remote_call, record_remote_failure};
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::pool::{restore_order, WorkerPool};

/// Annotation namespace for cached log entries
pub const ANNOTATION: &str = "logs";

/// Overlay field bound to the fetched entries
pub const ENTRIES_FIELD: &str = "filtered_logs";

const TYPE_NAME: &str = "stackdriver-logs";
const DEFAULT_FILTER_DAYS: i64 = 30;

/// Match resources against log entries selected by a rendered filter
#[derive(Debug, Clone)]
pub struct LogsFilter {
    manager: ResourceManager,
    template: String,
    placeholder: Regex,
    filter_days: i64,
    comparison: ValueFilter,
    pool: WorkerPool,
}

/// Why a resource could not be checked
#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("template field {0} not found")]
    Render(String),
    #[error(transparent)]
    Remote(#[from] Error),
}

impl LogsFilter {
    pub fn from_data(data: &Value, manager: &ResourceManager) -> Result<Self> {
        let template = data
            .get("filter")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let filter_days = match data.get("filter_days") {
            None => DEFAULT_FILTER_DAYS,
            Some(v) => v.as_i64().ok_or_else(|| {
                Error::validation(TYPE_NAME, "filter_days", format!("expected an integer, got {}", v))
            })?,
        };

        let mut comparison = Map::new();
        for field in ["key", "op", "value", "value_type", "value_regex"] {
            if let Some(v) = data.get(field) {
                comparison.insert(field.to_string(), v.clone());
            }
        }
        comparison
            .entry("key")
            .or_insert_with(|| Value::from(ENTRIES_FIELD));
        if !comparison.contains_key("op") && !comparison.contains_key("value") {
            comparison.insert("op".to_string(), Value::from("not-empty"));
        }
        let comparison = ValueFilter::from_data(TYPE_NAME, &Value::Object(comparison))?;

        let defaults = manager.config().logs;
        let pool = WorkerPool::new(
            data.get("batch_size")
                .and_then(Value::as_u64)
                .map_or(defaults.batch_size, |n| n as usize),
            data.get("max_workers")
                .and_then(Value::as_u64)
                .map_or(defaults.max_workers, |n| n as usize),
        );

        let placeholder = Regex::new(r"\{resource((?:\[[^\]\[]+\])+)\}")
            .map_err(|e| Error::internal(e.to_string()))?;

        Ok(Self {
            manager: manager.clone(),
            template,
            placeholder,
            filter_days,
            comparison,
            pool,
        })
    }

    /// Annotation key identifying this filter's fetched data
    pub fn cache_key(&self) -> String {
        format!("filter: {}, filter_days: {}", self.template, self.filter_days)
    }

    /// Substitute `{resource[a][b]}` placeholders from the resource
    pub fn render(&self, resource: &Resource) -> std::result::Result<String, String> {
        let mut rendered = String::with_capacity(self.template.len());
        let mut last = 0;
        for caps in self.placeholder.captures_iter(&self.template) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let segments: Vec<&str> = path
                .as_str()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split("][")
                .collect();

            let mut current = resource.get(segments[0]);
            for segment in &segments[1..] {
                current = current.and_then(|v| match v {
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    other => other.get(*segment),
                });
            }
            let value = match current {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => return Err(segments.join(".")),
                Some(other) => other.to_string(),
            };

            rendered.push_str(&self.template[last..whole.start()]);
            rendered.push_str(&value);
            last = whole.end();
        }
        rendered.push_str(&self.template[last..]);
        Ok(rendered)
    }

    fn query(&self, rendered: &str, since: DateTime<Utc>) -> String {
        format!("timestamp>=\"{}\" AND ({})", since.format("%Y-%m-%d"), rendered)
    }

    /// Every entry matching `query`, across pages
    async fn list_entries(&self, query: &str) -> Result<Vec<Value>> {
        let project = self.manager.client().default_scope().unwrap_or_default();
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut body = json!({
                "resourceNames": [format!("projects/{}", project)],
                "filter": query,
            });
            if let Some(token) = &page_token {
                body["pageToken"] = Value::from(token.as_str());
            }

            record_remote_call(TYPE_NAME);
            let page = self
                .manager
                .execute_with_retry(ApiRequest::new("logging", "entries.list", json!({ "body": body })))
                .await?;

            if let Some(items) = page.get("entries").and_then(Value::as_array) {
                entries.extend(items.iter().cloned());
            }
            match page.get("nextPageToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(entries)
    }

    async fn fetch_one(
        &self,
        resource: &Resource,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<Value>, FetchError> {
        let rendered = self.render(resource).map_err(FetchError::Render)?;
        self.list_entries(&self.query(&rendered, since))
            .await
            .map_err(FetchError::Remote)
    }

    /// Fetch and cache entries for one chunk, one resource at a time
    async fn fetch_chunk(&self, chunk: Vec<Resource>, since: DateTime<Utc>) -> Vec<Resource> {
        let key = self.cache_key();
        let mut fetched = Vec::with_capacity(chunk.len());
        for mut resource in chunk {
            match self.fetch_one(&resource, since).await {
                Ok(entries) => {
                    resource.annotate(ANNOTATION, key.clone(), Value::Array(entries));
                    fetched.push(resource);
                }
                Err(e) => {
                    warn!(
                        resource = %resource.id(self.manager.id_field()).unwrap_or_default(),
                        error = %e,
                        "Log query failed, excluding resource"
                    );
                    record_remote_failure(TYPE_NAME);
                }
            }
        }
        fetched
    }

    fn matches(&self, resource: &Resource) -> bool {
        let entries = resource
            .annotation_entry(ANNOTATION, &self.cache_key())
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let mut overlay = Map::new();
        overlay.insert(ENTRIES_FIELD.to_string(), entries);
        self.comparison.matches_with(resource, &overlay)
    }
}

#[async_trait]
impl Filter for LogsFilter {
    fn filter_type(&self) -> &str {
        TYPE_NAME
    }

    fn validate(&self) -> Result<()> {
        if self.template.is_empty() {
            return Err(Error::validation(TYPE_NAME, "filter", "required"));
        }
        if self.filter_days < 0 {
            return Err(Error::validation(
                TYPE_NAME,
                "filter_days",
                "must be zero or greater",
            ));
        }
        self.comparison.validate_comparison()
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let id_field = self.manager.id_field();
        let ids: Vec<String> = resources.iter().filter_map(|r| r.id(id_field)).collect();
        let since = Utc::now() - Duration::days(self.filter_days);

        let key = self.cache_key();
        let (cached, uncached): (Vec<Resource>, Vec<Resource>) = resources
            .into_iter()
            .partition(|r| r.annotation_entry(ANNOTATION, &key).is_some());
        debug!(
            cached = cached.len(),
            uncached = uncached.len(),
            "Resolving log entries"
        );

        let mut annotated = cached;
        if !uncached.is_empty() {
            annotated.extend(
                self.pool
                    .run(uncached, |chunk| self.fetch_chunk(chunk, since))
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
    let mut properties = value_properties();
    if let Value::Object(props) = &mut properties {
        props.insert("filter".to_string(), json!({ "type": "string" }));
        props.insert("filter_days".to_string(), json!({ "type": "integer", "minimum": 0 }));
        props.insert("batch_size".to_string(), json!({ "type": "integer", "minimum": 1 }));
        props.insert("max_workers".to_string(), json!({ "type": "integer", "minimum": 1 }));
    }
    type_schema(TYPE_NAME, properties, &["filter"])
}

pub(crate) fn factory(
    data: &Value,
    _registry: &FilterRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    Ok(Arc::new(LogsFilter::from_data(data, manager)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodian_core::{ApiClient, ProviderError};
    use custodian_policy::EngineConfig;

    struct NoClient;

    #[async_trait]
    impl ApiClient for NoClient {
        async fn execute(&self, _request: ApiRequest) -> std::result::Result<Value, ProviderError> {
            Ok(json!({}))
        }
    }

    fn filter(data: Value) -> LogsFilter {
        let manager = ResourceManager::new(
            "gcp.instance".to_string(),
            Arc::new(NoClient),
            Arc::new(EngineConfig::default()),
        );
        LogsFilter::from_data(&data, &manager).unwrap()
    }

    #[test]
    fn test_render_nested_placeholders() {
        let f = filter(json!({
            "filter": "resource.labels.instance_id=\"{resource[id]}\" AND labels.env=\"{resource[labels][env]}\""
        }));
        let resource =
            Resource::from_value(json!({"id": "i-1", "labels": {"env": "prod"}})).unwrap();
        assert_eq!(
            f.render(&resource).unwrap(),
            "resource.labels.instance_id=\"i-1\" AND labels.env=\"prod\""
        );
    }

    #[test]
    fn test_render_missing_field() {
        let f = filter(json!({"filter": "x=\"{resource[labels][owner]}\""}));
        let resource = Resource::from_value(json!({"id": "i-1", "labels": {}})).unwrap();
        assert_eq!(f.render(&resource).unwrap_err(), "labels.owner");
    }

    #[test]
    fn test_query_prefix() {
        let f = filter(json!({"filter": "severity>=ERROR"}));
        let since = DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            f.query("severity>=ERROR", since),
            "timestamp>=\"2024-03-05\" AND (severity>=ERROR)"
        );
    }

    #[test]
    fn test_defaults() {
        let f = filter(json!({"filter": "x"}));
        assert_eq!(f.filter_days, DEFAULT_FILTER_DAYS);
        assert_eq!(f.comparison.op().name(), "not-empty");
        assert_eq!(f.cache_key(), "filter: x, filter_days: 30");
        assert!(f.validate().is_ok());

        let negative = filter(json!({"filter": "x", "filter_days": -1}));
        assert!(negative.validate().unwrap_err().is_validation());
    }
}
