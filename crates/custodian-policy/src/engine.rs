//! Policy loading and execution

use std::sync::Arc;
use std::time::Instant;

use custodian_core::{ApiClient, Resource, ResourceSource, Result};
use custodian_telemetry::{AuditEvent, AuditSeverity, AuditTrail, MetricsCollector};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::actions::{Action, ActionResults};
use crate::config::EngineConfig;
use crate::filters::{BooleanFilter, BooleanOp, Filter};
use crate::manager::ResourceManager;
use crate::policy::{Policy, PolicyCollection};
use crate::registry::{ActionRegistry, FilterRegistry};

/// Builds policies from declarations and runs them
pub struct PolicyEngine {
    filters: FilterRegistry,
    actions: ActionRegistry,
    client: Arc<dyn ApiClient>,
    config: Arc<EngineConfig>,
    metrics: MetricsCollector,
}

impl PolicyEngine {
    pub fn new(
        filters: FilterRegistry,
        actions: ActionRegistry,
        client: Arc<dyn ApiClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            filters,
            actions,
            client,
            config: Arc::new(config),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Validate and build every enabled policy
    ///
    /// Nothing is returned unless every policy is valid.
    pub fn load(&self, collection: &PolicyCollection) -> Result<Vec<LoadedPolicy>> {
        let mut loaded = Vec::new();
        let mut first_error = None;

        for policy in collection.enabled() {
            match self.load_policy(policy) {
                Ok(p) => loaded.push(p),
                Err(e) => {
                    warn!(policy = %policy.name, error = %e, "Invalid policy");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(count = loaded.len(), "Policies loaded");
                Ok(loaded)
            }
        }
    }

    /// Validate and build one policy
    pub fn load_policy(&self, policy: &Policy) -> Result<LoadedPolicy> {
        let manager = ResourceManager::new(
            policy.resource.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.config),
        );
        let filters = self.filters.parse_list(&policy.filters, &manager)?;
        let actions = self.actions.parse_list(&policy.actions, &manager)?;

        Ok(LoadedPolicy {
            policy: policy.clone(),
            filter: BooleanFilter::new(BooleanOp::And, filters, manager.id_field()),
            actions,
            manager,
            metrics: self.metrics.clone(),
        })
    }
}

/// A validated policy ready to run
#[derive(Debug)]
pub struct LoadedPolicy {
    policy: Policy,
    manager: ResourceManager,
    filter: BooleanFilter,
    actions: Vec<Arc<dyn Action>>,
    metrics: MetricsCollector,
}

impl LoadedPolicy {
    pub fn name(&self) -> &str {
        &self.policy.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }

    /// Run the filter chain over `resources`
    pub async fn evaluate(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        self.filter.process(resources).await
    }

    /// Fetch, filter, then apply every action to the matches
    ///
    /// A fatal action error stops the run; actions already applied stand
    /// and are recorded in `audit`.
    pub async fn run(
        &self,
        source: &dyn ResourceSource,
        audit: &mut AuditTrail,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let name = self.policy.name.as_str();

        let resources = source.resources(&self.policy.resource).await?;
        let resource_count = resources.len();
        self.metrics.record_fetched(name, resource_count as u64);

        let matched = self.evaluate(resources).await?;
        self.metrics.record_matched(name, matched.len() as u64);
        let matched_ids = matched
            .iter()
            .map(|r| self.manager.resource_id(r))
            .collect::<Result<Vec<_>>>()?;

        info!(
            policy = name,
            resource = %self.policy.resource,
            count = resource_count,
            matched = matched.len(),
            "Filtered resources"
        );

        let mut action_results = Vec::with_capacity(self.actions.len());
        if !matched.is_empty() {
            for action in &self.actions {
                let action_type = action.action_type();
                self.metrics.record_action(name, action_type);

                match action.process(matched.clone()).await {
                    Ok(results) => {
                        audit.add_event(AuditEvent::new(action_type, name).with_data(&results));
                        action_results.push(results);
                    }
                    Err(e) => {
                        error!(policy = name, action = action_type, error = %e, "Action failed");
                        self.metrics.record_action_failure(name, action_type);
                        audit.add_event(
                            AuditEvent::new(action_type, name)
                                .with_data(json!({ "error": e.to_string() }))
                                .with_severity(AuditSeverity::High),
                        );
                        return Err(e);
                    }
                }
            }
        }

        Ok(RunReport {
            policy: name.to_string(),
            resource_type: self.policy.resource.clone(),
            resource_count,
            matched: matched_ids,
            actions: action_results,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Summary of one policy run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub policy: String,
    pub resource_type: String,
    /// Resources fetched before filtering
    pub resource_count: usize,
    /// Ids of matched resources, in fetch order
    pub matched: Vec<String>,
    pub actions: Vec<ActionResults>,
    pub duration_ms: u64,
}
