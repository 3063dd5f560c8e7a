//! Actions applied to matched resources
//!
//! Every provider call an action makes goes through [`ActionBase::run_api`],
//! which turns benign outcomes (dry runs, already-satisfied requests) into
//! `Ok(None)` and lets everything else abort the batch.

pub mod labels;
pub mod method;
pub mod notify;

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use custodian_core::{ApiRequest, Error, ProviderError, Resource, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::manager::ResourceManager;
use crate::registry::{ActionFactory, ActionRegistry};
use crate::schema;

pub use labels::{LabelAction, MarkForOpAction, UnlabelAction};
pub use method::MethodAction;
pub use notify::NotifyAction;

/// Outcome of one action over a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionResults {
    /// Action type
    pub action: String,

    /// Resources dropped by the action's own state pre-pass
    pub skipped: usize,

    /// Ids whose call succeeded
    pub succeeded: Vec<String>,

    /// Ids whose call was a benign no-op
    pub noop: Vec<String>,

    /// Resources the action was applied to, with any annotations it added
    #[serde(skip)]
    pub resources: Vec<Resource>,
}

impl ActionResults {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    /// Record the outcome of one `run_api` call
    pub fn record<T>(&mut self, id: String, outcome: &Option<T>) {
        match outcome {
            Some(_) => self.succeeded.push(id),
            None => self.noop.push(id),
        }
    }
}

/// An operation over matched resources
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    /// Registered type name
    fn action_type(&self) -> &str;

    /// Check the declaration without touching any resource
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Apply the action to `resources`
    async fn process(&self, resources: Vec<Resource>) -> Result<ActionResults> {
        let _ = resources;
        Err(Error::NotImplemented(self.action_type().to_string()))
    }
}

/// Shared plumbing for action implementations
#[derive(Debug, Clone)]
pub struct ActionBase {
    type_name: String,
    data: Value,
    manager: ResourceManager,
}

impl ActionBase {
    pub fn new(type_name: impl Into<String>, data: &Value, manager: &ResourceManager) -> Self {
        Self {
            type_name: type_name.into(),
            data: data.clone(),
            manager: manager.clone(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The declaration this action was built from
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    /// Keep resources whose `key` resolves to one of `allowed`
    pub fn filter_resources(
        &self,
        resources: Vec<Resource>,
        key: &str,
        allowed: &[&str],
    ) -> Vec<Resource> {
        filter_resources(&self.type_name, resources, key, allowed)
    }

    /// Await a provider call, swallowing benign errors
    pub async fn run_api<T, Fut>(&self, call: Fut) -> Result<Option<T>>
    where
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        match call.await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_benign() => {
                info!(
                    action = %self.type_name,
                    code = %e.code,
                    "Ignoring benign provider error: {}",
                    e.message
                );
                Ok(None)
            }
            Err(e) => Err(Error::Provider(e)),
        }
    }

    /// Issue `request` through [`run_api`](Self::run_api)
    ///
    /// Adds `dryRun: true` to the parameters in dry-run mode.
    pub async fn invoke(&self, mut request: ApiRequest) -> Result<Option<Value>> {
        if self.manager.config().dry_run {
            if let Value::Object(params) = &mut request.params {
                params.insert("dryRun".to_string(), Value::Bool(true));
            }
        }
        self.run_api(self.manager.execute(request)).await
    }

    /// Standard request parameters addressing one resource
    pub fn resource_params(&self, resource: &Resource) -> Result<Map<String, Value>> {
        let mut params = Map::new();
        if let Some(project) = self.manager.client().default_scope() {
            params.insert("project".to_string(), Value::from(project));
        }
        if let Some(zone) = resource.get("zone").and_then(Value::as_str) {
            // zone may be a full URL
            let zone = zone.rsplit('/').next().unwrap_or(zone);
            params.insert("zone".to_string(), Value::from(zone));
        }
        if let Some(name) = resource.get("name").and_then(Value::as_str) {
            params.insert("resource".to_string(), Value::from(name));
        }
        params.insert("id".to_string(), Value::from(self.manager.resource_id(resource)?));
        Ok(params)
    }
}

/// Keep resources whose `key` resolves to one of `allowed`, in order
///
/// Logs at INFO when anything was dropped, with the surviving count first.
pub fn filter_resources(
    type_name: &str,
    resources: Vec<Resource>,
    key: &str,
    allowed: &[&str],
) -> Vec<Resource> {
    let total = resources.len();
    let kept: Vec<Resource> = resources
        .into_iter()
        .filter(|r| match r.lookup(key) {
            Ok(Value::String(s)) => allowed.contains(&s.as_str()),
            Ok(other @ (Value::Number(_) | Value::Bool(_))) => {
                allowed.contains(&other.to_string().as_str())
            }
            _ => false,
        })
        .collect();

    if kept.len() != total {
        info!(
            "{} implicitly filtered {} of {} resources key:{} on {}",
            type_name,
            kept.len(),
            total,
            key,
            allowed.join(", ")
        );
    }
    kept
}

/// Register the built-in actions
pub fn register_defaults(registry: &mut ActionRegistry) -> Result<()> {
    registry.register("label", labels::label_schema(), labels::label_factory)?;
    registry.register("unlabel", labels::unlabel_schema(), labels::unlabel_factory)?;

    for (name, factory) in [
        ("stop", method::stop_factory as ActionFactory),
        ("start", method::start_factory),
        ("delete", method::delete_factory),
    ] {
        registry.register(name, schema::type_schema(name, json!({}), &[]), factory)?;
    }

    registry.register("notify", notify::schema(), notify::factory)?;

    registry.register(
        "mark-for-op",
        labels::mark_for_op_schema(),
        labels::mark_for_op_factory,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    struct NoClient;

    #[async_trait]
    impl custodian_core::ApiClient for NoClient {
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

    /// Log sink shared with a test subscriber
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
        let sink = Captured::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, sink.contents())
    }

    #[derive(Debug)]
    struct Bare;

    #[async_trait]
    impl Action for Bare {
        fn action_type(&self) -> &str {
            "bare"
        }
    }

    #[test]
    fn test_filter_resources_logs_survivors() {
        let resources: Vec<Resource> = [
            json!({"id": "X", "state": {"status": "running"}}),
            json!({"id": "Y", "state": {"status": "stopped"}}),
            json!({"id": "Z", "state": {"status": "running"}}),
        ]
        .into_iter()
        .filter_map(Resource::from_value)
        .collect();

        let (kept, logs) =
            capture(|| filter_resources("set-x", resources, "state.status", &["running"]));

        let ids: Vec<_> = kept.iter().filter_map(|r| r.id("id")).collect();
        assert_eq!(ids, vec!["X", "Z"]);
        assert!(
            logs.contains("set-x implicitly filtered 2 of 3 resources key:state.status on running"),
            "{}",
            logs
        );
    }

    #[test]
    fn test_filter_resources_silent_when_nothing_dropped() {
        let resources = vec![Resource::from_value(json!({"id": "X", "status": "RUNNING"})).unwrap()];
        let (kept, logs) = capture(|| filter_resources("stop", resources, "status", &["RUNNING"]));
        assert_eq!(kept.len(), 1);
        assert!(logs.is_empty(), "{}", logs);
    }

    #[tokio::test]
    async fn test_run_api_swallows_dry_run() {
        let base = ActionBase::new("stop", &json!({"type": "stop"}), &manager());

        let outcome: Option<()> = base
            .run_api(async {
                Err(ProviderError::new("DryRunOperation", "Request would have succeeded")
                    .with_status(412))
            })
            .await
            .unwrap();
        assert!(outcome.is_none());

        let err = base
            .run_api(async { Err::<(), _>(ProviderError::new("Foo", "Bar")) })
            .await
            .unwrap_err();
        assert_eq!(err.provider_error().map(|e| e.code.as_str()), Some("Foo"));

        let ok = base.run_api(async { Ok::<_, ProviderError>(7) }).await.unwrap();
        assert_eq!(ok, Some(7));
    }

    #[tokio::test]
    async fn test_default_process_is_not_implemented() {
        let err = Bare.process(Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotImplemented(ref t) if t == "bare"));
        assert_eq!(err.to_string(), "bare does not implement process");
    }

    #[test]
    fn test_resource_params() {
        let base = ActionBase::new("stop", &json!({"type": "stop"}), &manager());
        let r = Resource::from_value(json!({
            "id": "123",
            "name": "web-1",
            "zone": "https://compute.googleapis.com/compute/v1/projects/p/zones/us-east1-b"
        }))
        .unwrap();
        let params = base.resource_params(&r).unwrap();
        assert_eq!(params["zone"], json!("us-east1-b"));
        assert_eq!(params["resource"], json!("web-1"));
        assert_eq!(params["id"], json!("123"));
    }
}
