//! Boolean composition of filters
//!
//! Children are re-associated with their inputs by resource id, so a child
//! that reorders or annotates resources cannot confuse the parent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use custodian_core::{Error, Resource, Result};
use tracing::debug;

use super::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOp {
    And,
    Or,
    Not,
}

impl BooleanOp {
    pub fn name(&self) -> &'static str {
        match self {
            BooleanOp::And => "and",
            BooleanOp::Or => "or",
            BooleanOp::Not => "not",
        }
    }
}

/// `and`, `or` or `not` over child filters
#[derive(Debug, Clone)]
pub struct BooleanFilter {
    op: BooleanOp,
    filters: Vec<Arc<dyn Filter>>,
    id_field: String,
}

impl BooleanFilter {
    pub fn new(op: BooleanOp, filters: Vec<Arc<dyn Filter>>, id_field: impl Into<String>) -> Self {
        Self {
            op,
            filters,
            id_field: id_field.into(),
        }
    }

    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    fn id_of(&self, resource: &Resource) -> Result<String> {
        resource.id(&self.id_field).ok_or_else(|| {
            Error::internal(format!(
                "{} filter: resource without '{}' field",
                self.op.name(),
                self.id_field
            ))
        })
    }

    async fn all(&self, mut resources: Vec<Resource>) -> Result<Vec<Resource>> {
        for filter in &self.filters {
            if resources.is_empty() {
                break;
            }
            resources = filter.process(resources).await?;
        }
        Ok(resources)
    }

    async fn any(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let mut matched: HashMap<String, Resource> = HashMap::new();
        let mut remaining = resources.clone();

        for filter in &self.filters {
            if remaining.is_empty() {
                break;
            }
            for hit in filter.process(remaining.clone()).await? {
                matched.insert(self.id_of(&hit)?, hit);
            }
            let mut kept = Vec::with_capacity(remaining.len());
            for r in remaining {
                if !matched.contains_key(&self.id_of(&r)?) {
                    kept.push(r);
                }
            }
            remaining = kept;
        }

        let mut result = Vec::with_capacity(matched.len());
        for r in resources {
            if let Some(hit) = matched.remove(&self.id_of(&r)?) {
                result.push(hit);
            }
        }
        Ok(result)
    }

    async fn none(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let excluded = self
            .all(resources.clone())
            .await?
            .iter()
            .map(|r| self.id_of(r))
            .collect::<Result<HashSet<_>>>()?;

        let mut result = Vec::with_capacity(resources.len() - excluded.len().min(resources.len()));
        for r in resources {
            if !excluded.contains(&self.id_of(&r)?) {
                result.push(r);
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl Filter for BooleanFilter {
    fn filter_type(&self) -> &str {
        self.op.name()
    }

    fn validate(&self) -> Result<()> {
        self.filters.iter().try_for_each(|f| f.validate())
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let total = resources.len();
        let result = match self.op {
            BooleanOp::And => self.all(resources).await?,
            BooleanOp::Or => self.any(resources).await?,
            BooleanOp::Not => self.none(resources).await?,
        };
        debug!(
            op = self.op.name(),
            children = self.filters.len(),
            kept = result.len(),
            total = total,
            "Composite filter evaluated"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Operator, ValueFilter};
    use serde_json::{json, Value};

    fn resources() -> Vec<Resource> {
        [
            json!({"id": "1", "state": "running", "size": 10}),
            json!({"id": "2", "state": "stopped", "size": 50}),
            json!({"id": "3", "state": "running", "size": 80}),
            json!({"id": "4", "state": "pending"}),
        ]
        .into_iter()
        .filter_map(Resource::from_value)
        .collect()
    }

    fn value(key: &str, op: Operator, v: Value) -> Arc<dyn Filter> {
        Arc::new(ValueFilter::new(key, op, v).unwrap())
    }

    fn ids(resources: &[Resource]) -> Vec<String> {
        resources.iter().filter_map(|r| r.id("id")).collect()
    }

    #[tokio::test]
    async fn test_and() {
        let f = BooleanFilter::new(
            BooleanOp::And,
            vec![
                value("state", Operator::Eq, json!("running")),
                value("size", Operator::Gt, json!(20)),
            ],
            "id",
        );
        assert_eq!(ids(&f.process(resources()).await.unwrap()), vec!["3"]);
    }

    #[tokio::test]
    async fn test_or_keeps_input_order() {
        // second child matches an earlier resource than the first
        let f = BooleanFilter::new(
            BooleanOp::Or,
            vec![
                value("size", Operator::Gt, json!(60)),
                value("state", Operator::Eq, json!("stopped")),
                value("size", Operator::Absent, Value::Null),
            ],
            "id",
        );
        assert_eq!(ids(&f.process(resources()).await.unwrap()), vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_not_negates_implicit_and() {
        let f = BooleanFilter::new(
            BooleanOp::Not,
            vec![
                value("state", Operator::Eq, json!("running")),
                value("size", Operator::Lt, json!(50)),
            ],
            "id",
        );
        assert_eq!(ids(&f.process(resources()).await.unwrap()), vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_nested() {
        // running and not (size > 50)
        let inner = BooleanFilter::new(
            BooleanOp::Not,
            vec![value("size", Operator::Gt, json!(50))],
            "id",
        );
        let f = BooleanFilter::new(
            BooleanOp::And,
            vec![value("state", Operator::Eq, json!("running")), Arc::new(inner)],
            "id",
        );
        assert_eq!(ids(&f.process(resources()).await.unwrap()), vec!["1"]);
    }

    #[tokio::test]
    async fn test_or_requires_ids() {
        let f = BooleanFilter::new(
            BooleanOp::Or,
            vec![value("state", Operator::Eq, json!("running"))],
            "name",
        );
        assert!(matches!(
            f.process(resources()).await,
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_or_matches_nothing() {
        let f = BooleanFilter::new(BooleanOp::Or, vec![], "id");
        assert!(f.process(resources()).await.unwrap().is_empty());
        let f = BooleanFilter::new(BooleanOp::And, vec![], "id");
        assert_eq!(f.process(resources()).await.unwrap().len(), 4);
    }
}
