//! Provider client for offline runs
//!
//! Reads return empty responses and every mutating call is answered the
//! way a provider answers a dry run, so actions report what they would
//! have done without changing anything.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use custodian_core::{ApiClient, ApiRequest, ProviderError};
use serde_json::{json, Value};
use tracing::info;

/// Methods that only read provider state
const READ_METHODS: &[&str] = &["projects.timeSeries.list", "entries.list"];

#[derive(Debug)]
pub struct OfflineClient {
    project: String,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl OfflineClient {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Read requests answered so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Mutating requests intercepted so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ApiClient for OfflineClient {
    async fn execute(&self, request: ApiRequest) -> Result<Value, ProviderError> {
        if READ_METHODS.contains(&request.method.as_str()) {
            self.reads.fetch_add(1, Ordering::Relaxed);
            return Ok(json!({}));
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        info!(
            service = %request.service,
            method = %request.method,
            resource = %request.params.get("resource").or(request.params.get("id")).unwrap_or(&serde_json::Value::Null),
            "Intercepted mutating call"
        );
        Err(
            ProviderError::new("DryRunOperation", "Request would have succeeded, offline run")
                .with_status(412),
        )
    }

    fn default_scope(&self) -> Option<String> {
        Some(self.project.clone())
    }
}
