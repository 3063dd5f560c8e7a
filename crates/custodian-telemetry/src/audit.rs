//! Hash-chained audit trail of policy actions
//!
//! Every action invocation during a run is appended as an [`AuditEvent`].
//! Each event carries the hash of its predecessor, so any edit to a recorded
//! event breaks [`AuditTrail::verify`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::SystemTime;
use uuid::Uuid;

/// Audit trail with hash-chained events for tamper detection
#[derive(Debug)]
pub struct AuditTrail {
    run_id: String,
    events: Vec<AuditEvent>,
    chain_hash: Option<String>,
}

impl AuditTrail {
    /// Create a new audit trail with a fresh run id
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            events: Vec::new(),
            chain_hash: None,
        }
    }

    /// Identifier of the run this trail belongs to
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Add an event to the audit trail
    pub fn add_event(&mut self, event: AuditEvent) {
        let mut event = event;
        event.run_id = self.run_id.clone();
        event.previous_hash = self.chain_hash.clone();

        let hash = compute_hash(&event);
        event.hash = Some(hash.clone());

        self.chain_hash = Some(hash);
        self.events.push(event);
    }

    /// Verify the integrity of the audit trail
    pub fn verify(&self) -> bool {
        let mut prev_hash: Option<String> = None;

        for event in &self.events {
            if event.previous_hash != prev_hash {
                return false;
            }

            let computed_hash = compute_hash(event);
            if event.hash.as_ref() != Some(&computed_hash) {
                return false;
            }

            prev_hash = event.hash.clone();
        }

        true
    }

    /// Get all events
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash everything except the hash field itself
fn compute_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();

    hasher.update(event.run_id.as_bytes());
    hasher.update(event.event_type.as_bytes());
    hasher.update(event.policy.as_bytes());
    if let Some(ref data) = event.data {
        hasher.update(data.as_bytes());
    }
    hasher.update(format!("{:?}", event.timestamp).as_bytes());
    hasher.update(format!("{:?}", event.severity).as_bytes());
    if let Some(ref prev) = event.previous_hash {
        hasher.update(prev.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// A single audit event in the trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Run the event belongs to (set when appended)
    pub run_id: String,

    /// Event type, usually the action type (`stop`, `label`, ...)
    pub event_type: String,

    /// Policy that produced the event
    pub policy: String,

    /// Event data (JSON serialized)
    pub data: Option<String>,

    /// Timestamp
    pub timestamp: SystemTime,

    /// Hash of this event
    pub hash: Option<String>,

    /// Hash of previous event (for chaining)
    pub previous_hash: Option<String>,

    /// Severity level
    pub severity: AuditSeverity,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            run_id: String::new(),
            event_type: event_type.into(),
            policy: policy.into(),
            data: None,
            timestamp: SystemTime::now(),
            hash: None,
            previous_hash: None,
            severity: AuditSeverity::Info,
        }
    }

    /// Set event data
    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_string(&data).ok();
        self
    }

    /// Set severity
    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    High,
    Critical,
}
