//! Per-policy resource context handed to filters and actions

use std::fmt;
use std::sync::Arc;

use custodian_core::{ApiClient, ApiRequest, Error, ProviderError, Resource, Result, RetryPolicy};
use serde_json::Value;

use crate::config::EngineConfig;

/// Resource type, provider client and settings for one policy
#[derive(Clone)]
pub struct ResourceManager {
    resource_type: String,
    client: Arc<dyn ApiClient>,
    config: Arc<EngineConfig>,
    retry: RetryPolicy,
}

impl ResourceManager {
    pub fn new(
        resource_type: impl Into<String>,
        client: Arc<dyn ApiClient>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            resource_type: resource_type.into(),
            client,
            config,
            retry,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id_field(&self) -> &str {
        &self.config.id_field
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Id of `resource`, or an internal error when it has none
    pub fn resource_id(&self, resource: &Resource) -> Result<String> {
        resource.id(self.id_field()).ok_or_else(|| {
            Error::internal(format!(
                "{} resource without '{}' field",
                self.resource_type,
                self.id_field()
            ))
        })
    }

    /// Issue a request once, without retries
    pub async fn execute(&self, request: ApiRequest) -> std::result::Result<Value, ProviderError> {
        self.client.execute(request).await
    }

    /// Issue a request, retrying throttled failures
    pub async fn execute_with_retry(&self, request: ApiRequest) -> Result<Value> {
        let client = &self.client;
        self.retry
            .call(|| client.execute(request.clone()))
            .await
    }
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("resource_type", &self.resource_type)
            .field("id_field", &self.config.id_field)
            .finish_non_exhaustive()
    }
}
