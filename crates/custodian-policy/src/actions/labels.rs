//! Label mutation actions
//!
//! ```yaml
//! actions:
//!   - type: label
//!     labels:
//!       owner: {type: resource, key: metadata.creator}
//!   - type: unlabel
//!     labels: [temp]
//!   - type: mark-for-op
//!     op: stop
//!     days: 3
//! ```
//!
//! All three merge into the resource's current labels and call `setLabels`
//! with its `labelFingerprint`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use custodian_core::{ApiRequest, Error, Resource, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use super::{Action, ActionBase, ActionResults};
use crate::filters::ValueSpec;
use crate::manager::ResourceManager;
use crate::registry::ActionRegistry;
use crate::schema::{lookup_or, type_schema};
use crate::time::{format_action_date, parse_tz};

/// Label written by `mark-for-op` unless configured otherwise
pub const DEFAULT_MARK_LABEL: &str = "custodian_status";

/// Label value template; `{op}` and `{action_date}` are substituted
pub const DEFAULT_MARK_MESSAGE: &str = "resource_policy-{op}-{action_date}";

const DEFAULT_MARK_DAYS: i64 = 4;

/// Current labels merged with `set`, minus `remove`
fn merge_labels(
    resource: &Resource,
    set: &[(String, String)],
    remove: &[String],
) -> Map<String, Value> {
    let mut labels = resource
        .get("labels")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (k, v) in set {
        labels.insert(k.clone(), Value::from(v.as_str()));
    }
    for k in remove {
        labels.remove(k);
    }
    labels
}

fn set_labels_request(
    base: &ActionBase,
    resource: &Resource,
    labels: Map<String, Value>,
) -> Result<ApiRequest> {
    let mut params = base.resource_params(resource)?;
    let mut body = Map::new();
    body.insert("labels".to_string(), Value::Object(labels));
    if let Some(fingerprint) = resource.get("labelFingerprint") {
        body.insert("labelFingerprint".to_string(), fingerprint.clone());
    }
    params.insert("body".to_string(), Value::Object(body));
    Ok(ApiRequest::new("compute", "instances.setLabels", Value::Object(params)))
}

/// Apply a label update to each resource in turn
async fn update_labels<F>(
    base: &ActionBase,
    resources: Vec<Resource>,
    mut labels_for: F,
) -> Result<ActionResults>
where
    F: FnMut(&mut Resource) -> Map<String, Value> + Send,
{
    let mut results = ActionResults::new(base.type_name());
    let mut updated = Vec::with_capacity(resources.len());

    for mut resource in resources {
        let id = base.manager().resource_id(&resource)?;
        let labels = labels_for(&mut resource);
        let request = set_labels_request(base, &resource, labels)?;

        match base.invoke(request).await {
            Ok(outcome) => results.record(id, &outcome),
            Err(e) => {
                error!(
                    action = base.type_name(),
                    resource = %id,
                    error = %e,
                    "Label update failed, aborting remaining resources"
                );
                return Err(e);
            }
        }
        updated.push(resource);
    }
    results.resources = updated;
    Ok(results)
}

/// Render a resolved label value
fn label_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Set one or more labels
#[derive(Debug, Clone)]
pub struct LabelAction {
    base: ActionBase,
    labels: Vec<(String, ValueSpec)>,
}

impl LabelAction {
    pub fn from_data(data: &Value, manager: &ResourceManager) -> Result<Self> {
        let mut labels = Vec::new();
        if let Some(map) = data.get("labels").and_then(Value::as_object) {
            for (k, v) in map {
                labels.push((k.clone(), ValueSpec::parse("label", "labels", Some(v))?));
            }
        }
        if let Some(label) = data.get("label").and_then(Value::as_str) {
            labels.push((
                label.to_string(),
                ValueSpec::parse("label", "value", data.get("value"))?,
            ));
        }
        Ok(Self {
            base: ActionBase::new("label", data, manager),
            labels,
        })
    }
}

#[async_trait]
impl Action for LabelAction {
    fn action_type(&self) -> &str {
        "label"
    }

    fn validate(&self) -> Result<()> {
        let data = self.base.data();
        let single = data.get("label").is_some() || data.get("value").is_some();
        let multi = data.get("labels").is_some();

        if single && multi {
            return Err(Error::validation(
                "label",
                "labels",
                "cannot specify both label/value and labels",
            ));
        }
        if data.get("label").is_some() != data.get("value").is_some() {
            return Err(Error::validation(
                "label",
                "value",
                "label and value must be given together",
            ));
        }
        if self.labels.is_empty() {
            return Err(Error::validation(
                "label",
                "labels",
                "no labels to set",
            ));
        }
        Ok(())
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<ActionResults> {
        update_labels(&self.base, resources, |resource| {
            let set: Vec<(String, String)> = self
                .labels
                .iter()
                .filter_map(|(k, spec)| {
                    let value = spec.resolve_value(resource).and_then(label_value);
                    if value.is_none() {
                        debug!(label = %k, "Label value did not resolve, skipping");
                    }
                    value.map(|v| (k.clone(), v))
                })
                .collect();
            merge_labels(resource, &set, &[])
        })
        .await
    }
}

/// Remove labels
#[derive(Debug, Clone)]
pub struct UnlabelAction {
    base: ActionBase,
    labels: Vec<String>,
}

impl UnlabelAction {
    pub fn from_data(data: &Value, manager: &ResourceManager) -> Result<Self> {
        let labels = data
            .get("labels")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            base: ActionBase::new("unlabel", data, manager),
            labels,
        })
    }
}

#[async_trait]
impl Action for UnlabelAction {
    fn action_type(&self) -> &str {
        "unlabel"
    }

    fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(Error::validation("unlabel", "labels", "no labels to remove"));
        }
        Ok(())
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<ActionResults> {
        update_labels(&self.base, resources, |resource| {
            merge_labels(resource, &[], &self.labels)
        })
        .await
    }
}

/// Schedule a future operation by writing a dated label
#[derive(Debug, Clone)]
pub struct MarkForOpAction {
    base: ActionBase,
    op: String,
    label: String,
    msg: String,
    days: i64,
    hours: i64,
    tz: FixedOffset,
}

impl MarkForOpAction {
    pub fn from_data(
        data: &Value,
        registry: &ActionRegistry,
        manager: &ResourceManager,
    ) -> Result<Self> {
        let op = data
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("mark-for-op", "op", "required"))?;
        if op == "mark-for-op" || !registry.contains(op) {
            return Err(Error::validation(
                "mark-for-op",
                "op",
                format!("'{}' is not a schedulable action", op),
            ));
        }

        let tz_name = data.get("tz").and_then(Value::as_str).unwrap_or("utc");
        let tz = parse_tz(tz_name).ok_or_else(|| {
            Error::validation(
                "mark-for-op",
                "tz",
                format!("unsupported time zone '{}'", tz_name),
            )
        })?;

        Ok(Self {
            base: ActionBase::new("mark-for-op", data, manager),
            op: op.to_string(),
            label: data
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MARK_LABEL)
                .to_string(),
            msg: data
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MARK_MESSAGE)
                .to_string(),
            days: data.get("days").and_then(Value::as_i64).unwrap_or(0),
            hours: data.get("hours").and_then(Value::as_i64).unwrap_or(0),
            tz,
        })
    }

    /// Date the operation becomes due, as written into the label
    pub fn action_date(&self, now: DateTime<Utc>) -> String {
        let days = if self.days == 0 && self.hours == 0 {
            DEFAULT_MARK_DAYS
        } else {
            self.days
        };
        let due: DateTime<FixedOffset> =
            now.with_timezone(&self.tz) + Duration::days(days) + Duration::hours(self.hours);
        format_action_date(&due, self.hours > 0)
    }

    /// Label value for a given action date
    pub fn message(&self, action_date: &str) -> String {
        self.msg
            .replace("{op}", &self.op)
            .replace("{action_date}", action_date)
    }
}

#[async_trait]
impl Action for MarkForOpAction {
    fn action_type(&self) -> &str {
        "mark-for-op"
    }

    fn validate(&self) -> Result<()> {
        if self.days < 0 || self.hours < 0 {
            return Err(Error::validation(
                "mark-for-op",
                "days",
                "days and hours must not be negative",
            ));
        }
        Ok(())
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<ActionResults> {
        let action_date = self.action_date(Utc::now());
        let message = self.message(&action_date);
        info!(
            op = %self.op,
            action_date = %action_date,
            count = resources.len(),
            "Marking resources for operation"
        );

        let set = [(self.label.clone(), message)];
        update_labels(&self.base, resources, |resource| {
            resource.annotate("marked-for-op", "op", Value::from(self.op.as_str()));
            resource.annotate("marked-for-op", "action_date", Value::from(action_date.as_str()));
            resource.annotate("marked-for-op", "label", Value::from(self.label.as_str()));
            merge_labels(resource, &set, &[])
        })
        .await
    }
}

pub(crate) fn label_schema() -> Value {
    let value = lookup_or(json!({ "type": ["string", "number", "boolean"] }));
    type_schema(
        "label",
        json!({
            "label": { "type": "string" },
            "value": value.clone(),
            "labels": {
                "type": "object",
                "additionalProperties": value,
            },
        }),
        &[],
    )
}

pub(crate) fn unlabel_schema() -> Value {
    type_schema(
        "unlabel",
        json!({
            "labels": { "type": "array", "items": { "type": "string" } },
        }),
        &["labels"],
    )
}

pub(crate) fn mark_for_op_schema() -> Value {
    type_schema(
        "mark-for-op",
        json!({
            "op": { "type": "string" },
            "label": { "type": "string" },
            "msg": { "type": "string" },
            "tz": { "type": "string" },
            "days": { "type": "integer", "minimum": 0 },
            "hours": { "type": "integer", "minimum": 0 },
        }),
        &["op"],
    )
}

pub(crate) fn label_factory(
    data: &Value,
    _registry: &ActionRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Action>> {
    Ok(Arc::new(LabelAction::from_data(data, manager)?))
}

pub(crate) fn unlabel_factory(
    data: &Value,
    _registry: &ActionRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Action>> {
    Ok(Arc::new(UnlabelAction::from_data(data, manager)?))
}

pub(crate) fn mark_for_op_factory(
    data: &Value,
    registry: &ActionRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Action>> {
    Ok(Arc::new(MarkForOpAction::from_data(data, registry, manager)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use chrono::TimeZone;
    use custodian_core::{ApiClient, ProviderError};

    struct NoClient;

    #[async_trait]
    impl ApiClient for NoClient {
        async fn execute(&self, _request: ApiRequest) -> std::result::Result<Value, ProviderError> {
            Err(ProviderError::new("Unused", "no client in tests"))
        }
    }

    fn manager() -> ResourceManager {
        ResourceManager::new(
            "gcp.instance",
            Arc::new(NoClient),
            Arc::new(EngineConfig::default()),
        )
    }

    fn mark(data: Value) -> MarkForOpAction {
        let registry = ActionRegistry::with_defaults().unwrap();
        MarkForOpAction::from_data(&data, &registry, &manager()).unwrap()
    }

    #[test]
    fn test_mark_defaults_to_four_days() {
        let action = mark(json!({"type": "mark-for-op", "op": "stop"}));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();

        let date = action.action_date(now);
        assert_eq!(date, "2024_01_05__0_0");
        assert_eq!(action.message(&date), "resource_policy-stop-2024_01_05__0_0");
    }

    #[test]
    fn test_mark_with_hours_keeps_time() {
        let action = mark(json!({"type": "mark-for-op", "op": "delete", "hours": 6}));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();
        assert_eq!(action.action_date(now), "2024_01_01__16_15");
    }

    #[test]
    fn test_mark_in_offset_zone() {
        let action = mark(json!({"type": "mark-for-op", "op": "stop", "days": 1, "tz": "-05:00"}));
        // 02:00 UTC is still the previous day at -05:00
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        assert_eq!(action.action_date(now), "2024_03_10__0_0");
    }

    #[test]
    fn test_mark_rejects_unknown_op() {
        let registry = ActionRegistry::with_defaults().unwrap();
        for op in ["explode", "mark-for-op"] {
            let result = MarkForOpAction::from_data(
                &json!({"type": "mark-for-op", "op": op}),
                &registry,
                &manager(),
            );
            assert!(
                matches!(result, Err(Error::Validation { ref field, .. }) if field == "op"),
                "{}",
                op
            );
        }
    }

    #[test]
    fn test_label_forms_are_exclusive() {
        let m = manager();
        let both = LabelAction::from_data(
            &json!({"type": "label", "label": "a", "value": "b", "labels": {"c": "d"}}),
            &m,
        )
        .unwrap();
        assert!(both.validate().is_err());

        let dangling = LabelAction::from_data(&json!({"type": "label", "label": "a"}), &m).unwrap();
        assert!(dangling.validate().is_err());

        let ok = LabelAction::from_data(&json!({"type": "label", "labels": {"env": "prod"}}), &m)
            .unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_merge_labels() {
        let r = Resource::from_value(json!({"labels": {"a": "1", "b": "2"}})).unwrap();
        let merged = merge_labels(&r, &[("c".to_string(), "3".to_string())], &["a".to_string()]);
        assert_eq!(Value::Object(merged), json!({"b": "2", "c": "3"}));

        let bare = Resource::from_value(json!({"id": "x"})).unwrap();
        assert!(merge_labels(&bare, &[], &["a".to_string()]).is_empty());
    }
}
