//! Actions that call one compute method per resource

use std::sync::Arc;

use async_trait::async_trait;
use custodian_core::{ApiRequest, Resource, Result};
use serde_json::Value;
use tracing::{debug, error};

use super::{Action, ActionBase, ActionResults};
use crate::manager::ResourceManager;
use crate::registry::ActionRegistry;

/// Calls `service`/`method` for every resource in an allowed state
#[derive(Debug, Clone)]
pub struct MethodAction {
    base: ActionBase,
    service: &'static str,
    method: &'static str,
    /// Key and values a resource must have to be acted on
    state_filter: Option<(&'static str, &'static [&'static str])>,
}

impl MethodAction {
    pub fn new(
        type_name: &str,
        data: &Value,
        manager: &ResourceManager,
        service: &'static str,
        method: &'static str,
    ) -> Self {
        Self {
            base: ActionBase::new(type_name, data, manager),
            service,
            method,
            state_filter: None,
        }
    }

    /// Only act on resources whose `key` is one of `allowed`
    pub fn with_state_filter(mut self, key: &'static str, allowed: &'static [&'static str]) -> Self {
        self.state_filter = Some((key, allowed));
        self
    }
}

#[async_trait]
impl Action for MethodAction {
    fn action_type(&self) -> &str {
        self.base.type_name()
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<ActionResults> {
        let mut results = ActionResults::new(self.base.type_name());
        let total = resources.len();

        let resources = match self.state_filter {
            Some((key, allowed)) => self.base.filter_resources(resources, key, allowed),
            None => resources,
        };
        results.skipped = total - resources.len();

        for resource in &resources {
            let id = self.base.manager().resource_id(resource)?;
            let params = self.base.resource_params(resource)?;
            let request = ApiRequest::new(self.service, self.method, Value::Object(params));

            debug!(action = self.base.type_name(), resource = %id, "Invoking {}", self.method);
            match self.base.invoke(request).await {
                Ok(outcome) => results.record(id, &outcome),
                Err(e) => {
                    error!(
                        action = self.base.type_name(),
                        resource = %id,
                        error = %e,
                        "Action failed, aborting remaining resources"
                    );
                    return Err(e);
                }
            }
        }
        results.resources = resources;
        Ok(results)
    }
}

pub(crate) fn stop_factory(
    data: &Value,
    _registry: &ActionRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Action>> {
    Ok(Arc::new(
        MethodAction::new("stop", data, manager, "compute", "instances.stop")
            .with_state_filter("status", &["RUNNING"]),
    ))
}

pub(crate) fn start_factory(
    data: &Value,
    _registry: &ActionRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Action>> {
    Ok(Arc::new(
        MethodAction::new("start", data, manager, "compute", "instances.start")
            .with_state_filter("status", &["TERMINATED"]),
    ))
}

pub(crate) fn delete_factory(
    data: &Value,
    _registry: &ActionRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Action>> {
    Ok(Arc::new(MethodAction::new(
        "delete",
        data,
        manager,
        "compute",
        "instances.delete",
    )))
}
