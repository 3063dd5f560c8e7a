//! Provider boundary: remote calls, resource fetch, and error classification
//!
//! Cloud SDK sessions live outside this workspace. The engine only sees:
//! - [`ResourceSource`], which returns an ordered list of resources
//! - [`ApiClient`], which executes a single API method and may fail with a
//!   classified [`ProviderError`]
//!
//! Retry logic and the action call guard depend only on [`ErrorClass`], never
//! on provider-specific error types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{Resource, Result};

/// Codes that mean "already in the requested state"
const IDEMPOTENT_CODES: &[&str] = &[
    "IncorrectInstanceState",
    "InvalidInstanceID.NotFound",
    "AlreadyExists",
    "alreadyExists",
    "notFound",
];

/// Codes that mean the provider is rate limiting us
const THROTTLE_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "RESOURCE_EXHAUSTED",
];

/// Classification of a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// No-op outcome: dry run confirmation or already in target state
    Benign,
    /// Rate limit or quota; safe to retry
    Throttled,
    /// Anything else
    Fatal,
}

/// Error returned by a provider API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderError {
    /// Provider error code (e.g. `DryRunOperation`, `rateLimitExceeded`)
    pub code: String,

    /// Human readable message
    pub message: String,

    /// HTTP status, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Classification derived from code, status, and message
    pub class: ErrorClass,
}

impl ProviderError {
    /// Create an error and classify it from its code
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        let class = Self::classify(&code, None, &message);
        Self {
            code,
            message,
            status: None,
            class,
        }
    }

    /// Attach an HTTP status and reclassify
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self.class = Self::classify(&self.code, self.status, &self.message);
        self
    }

    /// Override the classification
    pub fn with_class(mut self, class: ErrorClass) -> Self {
        self.class = class;
        self
    }

    /// Classify a provider response
    pub fn classify(code: &str, status: Option<u16>, message: &str) -> ErrorClass {
        if code == "DryRunOperation"
            && status == Some(412)
            && message.contains("would have succeeded")
        {
            return ErrorClass::Benign;
        }
        if IDEMPOTENT_CODES.contains(&code) {
            return ErrorClass::Benign;
        }
        if THROTTLE_CODES.contains(&code) || status == Some(429) {
            return ErrorClass::Throttled;
        }
        ErrorClass::Fatal
    }

    pub fn is_benign(&self) -> bool {
        self.class == ErrorClass::Benign
    }

    pub fn is_throttled(&self) -> bool {
        self.class == ErrorClass::Throttled
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.code, status, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// A single API method invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Service name (e.g. `compute`, `monitoring`, `logging`)
    pub service: String,

    /// Method path within the service (e.g. `instances.stop`)
    pub method: String,

    /// Method parameters
    pub params: Value,
}

impl ApiRequest {
    /// Create a new request
    pub fn new(service: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            params,
        }
    }
}

/// Executes provider API methods
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Execute a request, returning the decoded response body
    async fn execute(&self, request: ApiRequest) -> std::result::Result<Value, ProviderError>;

    /// Default scope for queries (project, subscription, account)
    fn default_scope(&self) -> Option<String> {
        None
    }
}

/// Supplies the resources a policy is evaluated against
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Fetch all resources of a type, in a stable order
    async fn resources(&self, resource_type: &str) -> Result<Vec<Resource>>;
}
