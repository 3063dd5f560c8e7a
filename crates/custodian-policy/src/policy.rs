//! Policy definitions

use std::collections::HashSet;
use std::path::Path;

use custodian_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource type plus the filters and actions applied to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name, unique within a collection
    pub name: String,

    /// Resource type the policy evaluates (e.g. `gcp.instance`)
    pub resource: String,

    /// Description of what this policy enforces
    #[serde(default)]
    pub description: String,

    /// Filter declarations, combined with an implicit `and`
    #[serde(default)]
    pub filters: Vec<Value>,

    /// Action declarations, run in order
    #[serde(default)]
    pub actions: Vec<Value>,

    /// Whether this policy is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Policy {
    /// Load a single policy from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// A set of policies loaded together
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyCollection {
    pub policies: Vec<Policy>,
}

impl PolicyCollection {
    /// Load a collection from YAML with a top-level `policies:` list
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let collection: Self = serde_yaml::from_str(yaml)?;
        collection.check_names()?;
        Ok(collection)
    }

    /// Load a collection from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Enabled policies, in file order
    pub fn enabled(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().filter(|p| p.enabled)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn check_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for policy in &self.policies {
            if !seen.insert(policy.name.as_str()) {
                return Err(Error::validation(
                    policy.name.as_str(),
                    "name",
                    "duplicate policy name",
                ));
            }
        }
        Ok(())
    }
}
