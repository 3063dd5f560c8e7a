//! Publish matched resources to a pub/sub topic

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use custodian_core::{ApiRequest, Resource, Result};
use serde_json::{json, Value};
use tracing::{error, info};

use super::{Action, ActionBase, ActionResults};
use crate::manager::ResourceManager;
use crate::registry::ActionRegistry;
use crate::schema::type_schema;

const DEFAULT_BATCH_SIZE: usize = 50;

/// Sends one message per batch of resources
#[derive(Debug, Clone)]
pub struct NotifyAction {
    base: ActionBase,
    topic: String,
    subject: String,
    to: Vec<String>,
    batch_size: usize,
}

impl NotifyAction {
    pub fn from_data(data: &Value, manager: &ResourceManager) -> Result<Self> {
        let topic = data
            .pointer("/transport/topic")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let to = data
            .get("to")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        Ok(Self {
            base: ActionBase::new("notify", data, manager),
            topic,
            subject: data
                .get("subject")
                .and_then(Value::as_str)
                .unwrap_or("Custodian notification")
                .to_string(),
            to,
            batch_size: data
                .get("batch_size")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_BATCH_SIZE),
        })
    }

    /// Encoded message body for one batch
    pub fn encode(&self, resources: &[Resource]) -> Result<String> {
        let payload = json!({
            "resource_type": self.base.manager().resource_type(),
            "subject": self.subject,
            "to": self.to,
            "resources": resources,
        });
        Ok(STANDARD.encode(serde_json::to_vec(&payload)?))
    }
}

#[async_trait]
impl Action for NotifyAction {
    fn action_type(&self) -> &str {
        "notify"
    }

    fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(custodian_core::Error::validation(
                "notify",
                "transport",
                "a pubsub topic is required",
            ));
        }
        if self.batch_size == 0 {
            return Err(custodian_core::Error::validation(
                "notify",
                "batch_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<ActionResults> {
        let mut results = ActionResults::new("notify");

        for batch in resources.chunks(self.batch_size) {
            let ids = batch
                .iter()
                .map(|r| self.base.manager().resource_id(r))
                .collect::<Result<Vec<_>>>()?;

            let request = ApiRequest::new(
                "pubsub",
                "projects.topics.publish",
                json!({
                    "topic": self.topic,
                    "body": {
                        "messages": [{
                            "data": self.encode(batch)?,
                            "attributes": { "subject": self.subject },
                        }]
                    }
                }),
            );

            match self.base.invoke(request).await {
                Ok(outcome) => {
                    info!(topic = %self.topic, count = ids.len(), "Published notification");
                    for id in ids {
                        results.record(id, &outcome);
                    }
                }
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Notification failed");
                    return Err(e);
                }
            }
        }
        results.resources = resources;
        Ok(results)
    }
}

pub(crate) fn schema() -> Value {
    type_schema(
        "notify",
        json!({
            "to": { "type": "array", "items": { "type": "string" } },
            "subject": { "type": "string" },
            "batch_size": { "type": "integer", "minimum": 1 },
            "transport": {
                "type": "object",
                "additionalProperties": false,
                "required": ["type", "topic"],
                "properties": {
                    "type": { "enum": ["pubsub"] },
                    "topic": { "type": "string" },
                },
            },
        }),
        &["to", "transport"],
    )
}

pub(crate) fn factory(
    data: &Value,
    _registry: &ActionRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Action>> {
    Ok(Arc::new(NotifyAction::from_data(data, manager)?))
}
