//! Resource snapshots read from disk

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use custodian_core::{Error, Resource, ResourceSource, Result};
use serde_json::Value;
use tracing::debug;

/// Resources loaded from a JSON file
///
/// The file is either a list of resources, served for every resource
/// type, or a mapping from resource type to list.
#[derive(Debug, Default)]
pub struct SnapshotSource {
    by_type: HashMap<String, Vec<Resource>>,
    any: Option<Vec<Resource>>,
}

impl SnapshotSource {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(json)? {
            Value::Array(items) => Ok(Self {
                by_type: HashMap::new(),
                any: Some(resources(items, "snapshot")?),
            }),
            Value::Object(map) => {
                let mut by_type = HashMap::new();
                for (resource_type, items) in map {
                    let Value::Array(items) = items else {
                        return Err(Error::config(format!(
                            "snapshot entry {} must be a list of resources",
                            resource_type
                        )));
                    };
                    let list = resources(items, &resource_type)?;
                    by_type.insert(resource_type, list);
                }
                Ok(Self { by_type, any: None })
            }
            _ => Err(Error::config(
                "snapshot must be a list of resources or a mapping of resource type to list",
            )),
        }
    }
}

fn resources(items: Vec<Value>, context: &str) -> Result<Vec<Resource>> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            Resource::from_value(item).ok_or_else(|| {
                Error::config(format!("{}: item {} is not an object", context, i))
            })
        })
        .collect()
}

#[async_trait]
impl ResourceSource for SnapshotSource {
    async fn resources(&self, resource_type: &str) -> Result<Vec<Resource>> {
        let found = self
            .by_type
            .get(resource_type)
            .or(self.any.as_ref())
            .cloned()
            .unwrap_or_default();
        debug!(resource_type, count = found.len(), "Loaded snapshot resources");
        Ok(found)
    }
}
