//! Match resources whose scheduled operation is due
//!
//! Pairs with the `mark-for-op` action, which writes a label such as
//! `resource_policy-stop-2024_01_05__0_0`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use custodian_core::{Error, Resource, Result};
use serde_json::Value;
use tracing::debug;

use super::Filter;
use crate::actions::labels::DEFAULT_MARK_LABEL;
use crate::time::{parse_action_date, parse_tz};

#[derive(Debug, Clone)]
pub struct MarkedForOpFilter {
    label: String,
    op: String,
    tz: FixedOffset,
    skew: Duration,
}

impl MarkedForOpFilter {
    pub fn from_data(data: &Value) -> Result<Self> {
        let tz_name = data.get("tz").and_then(Value::as_str).unwrap_or("utc");
        let tz = parse_tz(tz_name).ok_or_else(|| {
            Error::validation(
                "marked-for-op",
                "tz",
                format!("unsupported time zone '{}'", tz_name),
            )
        })?;

        let days = data.get("skew").and_then(Value::as_f64).unwrap_or(0.0);
        let hours = data.get("skew_hours").and_then(Value::as_f64).unwrap_or(0.0);

        Ok(Self {
            label: data
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MARK_LABEL)
                .to_string(),
            op: data
                .get("op")
                .and_then(Value::as_str)
                .unwrap_or("stop")
                .to_string(),
            tz,
            skew: Duration::seconds(((days * 24.0 + hours) * 3600.0) as i64),
        })
    }

    /// Whether `resource` is marked for this op at or before `now + skew`
    pub fn is_due(&self, resource: &Resource, now: DateTime<Utc>) -> bool {
        let Some(mark) = resource
            .get("labels")
            .and_then(|l| l.get(&self.label))
            .and_then(Value::as_str)
        else {
            return false;
        };

        // <prefix>-<op>-<date>
        let Some((rest, date)) = mark.rsplit_once('-') else {
            return false;
        };
        if rest != self.op && !rest.ends_with(&format!("-{}", self.op)) {
            return false;
        }
        let Some(action_date) = parse_action_date(date, &self.tz) else {
            debug!(label = %self.label, value = mark, "Unparseable mark date");
            return false;
        };

        now.with_timezone(&self.tz) + self.skew >= action_date
    }
}

#[async_trait]
impl Filter for MarkedForOpFilter {
    fn filter_type(&self) -> &str {
        "marked-for-op"
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let now = Utc::now();
        Ok(resources
            .into_iter()
            .filter(|r| self.is_due(r, now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn marked(value: &str) -> Resource {
        Resource::from_value(json!({"id": "i-1", "labels": {"custodian_status": value}})).unwrap()
    }

    #[test]
    fn test_due_marks() {
        let f = MarkedForOpFilter::from_data(&json!({"op": "stop"})).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();

        assert!(f.is_due(&marked("resource_policy-stop-2024_01_05__0_0"), now));
        assert!(f.is_due(&marked("resource_policy-stop-2024_01_01__0_0"), now));
        assert!(!f.is_due(&marked("resource_policy-stop-2024_01_06__0_0"), now));
        assert!(!f.is_due(&marked("resource_policy-delete-2024_01_01__0_0"), now));
        assert!(!f.is_due(&marked("garbage"), now));
    }

    #[test]
    fn test_skew_brings_date_forward() {
        let f = MarkedForOpFilter::from_data(&json!({"op": "delete", "skew": 2})).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();

        assert!(f.is_due(&marked("resource_policy-delete-2024_01_07__0_0"), now));
        assert!(!f.is_due(&marked("resource_policy-delete-2024_01_08__0_0"), now));
    }

    #[test]
    fn test_offset_time_zone() {
        let f = MarkedForOpFilter::from_data(&json!({"op": "stop", "tz": "+05:00"})).unwrap();
        // 2024-01-05 00:00 at +05:00 is 2024-01-04 19:00 UTC
        let before = Utc.with_ymd_and_hms(2024, 1, 4, 18, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 4, 19, 0, 0).unwrap();
        let r = marked("resource_policy-stop-2024_01_05__0_0");

        assert!(!f.is_due(&r, before));
        assert!(f.is_due(&r, after));
    }

    #[test]
    fn test_rejects_unknown_tz() {
        let result = MarkedForOpFilter::from_data(&json!({"tz": "Europe/Paris"}));
        assert!(matches!(result, Err(Error::Validation { ref field, .. }) if field == "tz"));
    }
}
