//! Name to constructor registries for filters and actions
//!
//! Registries are plain values built at startup and passed by reference
//! into policy loading. Every declaration is checked against the type's
//! JSON schema before its constructor runs, and the built instance's
//! `validate()` runs before it is handed out.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use custodian_core::{Error, Result};
use serde_json::{json, Map, Value};

use crate::actions::{self, Action};
use crate::filters::{self, Filter};
use crate::manager::ResourceManager;

/// Builds a filter from its declaration
pub type FilterFactory =
    fn(&Value, &FilterRegistry, &ResourceManager) -> Result<Arc<dyn Filter>>;

/// Builds an action from its declaration
pub type ActionFactory =
    fn(&Value, &ActionRegistry, &ResourceManager) -> Result<Arc<dyn Action>>;

struct Registration<F> {
    factory: F,
    schema: Value,
    validator: jsonschema::Validator,
}

/// Type name to constructor map with schema validation
pub struct Registry<F> {
    kind: &'static str,
    entries: BTreeMap<String, Registration<F>>,
}

impl<F: Copy> Registry<F> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Register `name`; registering a name twice is an error
    pub fn register(&mut self, name: &str, schema: Value, factory: F) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(Error::config(format!(
                "{} type '{}' is already registered",
                self.kind, name
            )));
        }
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            Error::config(format!("{} type '{}': invalid schema: {}", self.kind, name, e))
        })?;
        self.entries.insert(
            name.to_string(),
            Registration {
                factory,
                schema,
                validator,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|r| &r.schema)
    }

    /// Normalize a declaration and check it against its type's schema
    ///
    /// A bare string is shorthand for `{type: <string>}`.
    fn resolve(&self, spec: &Value) -> Result<(Value, F)> {
        let data = match spec {
            Value::String(name) => json!({ "type": name }),
            Value::Object(_) => spec.clone(),
            other => {
                return Err(Error::validation(
                    self.kind,
                    "type",
                    format!("expected a mapping or a type name, got {}", other),
                ))
            }
        };

        let type_name = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation(self.kind, "type", "missing type"))?;

        let entry = self.entries.get(type_name).ok_or_else(|| {
            let known: Vec<&str> = self.names().collect();
            Error::validation(
                type_name,
                "type",
                format!("unknown {} type (known: {})", self.kind, known.join(", ")),
            )
        })?;

        let errors: Vec<(String, String)> = entry
            .validator
            .iter_errors(&data)
            .map(|e| (e.instance_path().to_string(), e.to_string()))
            .collect();
        if let Some((path, _)) = errors.first() {
            let field = path.trim_start_matches('/').split('/').next().unwrap_or_default();
            let field = if field.is_empty() { "spec" } else { field };
            let messages: Vec<String> = errors
                .iter()
                .map(|(path, msg)| {
                    if path.is_empty() {
                        msg.clone()
                    } else {
                        format!("{}: {}", path, msg)
                    }
                })
                .collect();
            return Err(Error::validation(type_name, field, messages.join("; ")));
        }

        Ok((data, entry.factory))
    }
}

impl<F> fmt::Debug for Registry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry of filter types
#[derive(Debug)]
pub struct FilterRegistry {
    inner: Registry<FilterFactory>,
}

impl FilterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            inner: Registry::new("filter"),
        }
    }

    /// A registry with the built-in filters
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        filters::register_defaults(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, schema: Value, factory: FilterFactory) -> Result<()> {
        self.inner.register(name, schema, factory)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.names()
    }

    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.inner.schema(name)
    }

    /// Build and validate one filter
    pub fn factory(&self, spec: &Value, manager: &ResourceManager) -> Result<Arc<dyn Filter>> {
        let spec = expand_shorthand(spec);
        let (data, factory) = self.inner.resolve(&spec)?;
        let filter = factory(&data, self, manager)?;
        filter.validate()?;
        Ok(filter)
    }

    /// Build and validate a list of filters
    pub fn parse_list(
        &self,
        specs: &[Value],
        manager: &ResourceManager,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        specs.iter().map(|s| self.factory(s, manager)).collect()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite `{and: [...]}` and `{"key": value}` into full declarations
fn expand_shorthand(spec: &Value) -> Value {
    let Value::Object(map) = spec else {
        return spec.clone();
    };
    if map.contains_key("type") || map.len() != 1 {
        return spec.clone();
    }
    let Some((key, value)) = map.iter().next() else {
        return spec.clone();
    };

    let mut data = Map::new();
    match key.as_str() {
        "and" | "or" | "not" if value.is_array() => {
            data.insert("type".to_string(), Value::from(key.as_str()));
            data.insert("filters".to_string(), value.clone());
        }
        _ => {
            data.insert("type".to_string(), Value::from("value"));
            data.insert("key".to_string(), Value::from(key.as_str()));
            data.insert("value".to_string(), value.clone());
        }
    }
    Value::Object(data)
}

/// Registry of action types
#[derive(Debug)]
pub struct ActionRegistry {
    inner: Registry<ActionFactory>,
}

impl ActionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            inner: Registry::new("action"),
        }
    }

    /// A registry with the built-in actions
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        actions::register_defaults(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, schema: Value, factory: ActionFactory) -> Result<()> {
        self.inner.register(name, schema, factory)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.names()
    }

    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.inner.schema(name)
    }

    /// Build and validate one action
    pub fn factory(&self, spec: &Value, manager: &ResourceManager) -> Result<Arc<dyn Action>> {
        let (data, factory) = self.inner.resolve(spec)?;
        let action = factory(&data, self, manager)?;
        action.validate()?;
        Ok(action)
    }

    pub fn parse_list(
        &self,
        specs: &[Value],
        manager: &ResourceManager,
    ) -> Result<Vec<Arc<dyn Action>>> {
        specs.iter().map(|s| self.factory(s, manager)).collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
