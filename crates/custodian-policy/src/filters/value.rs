//! Generic key/operator/value predicate
//!
//! ```yaml
//! filters:
//!   - type: value
//!     key: state.status
//!     op: in
//!     value: [running, pending]
//!   - "labels.env": prod
//! ```

use async_trait::async_trait;
use chrono::Utc;
use custodian_core::{Error, KeyPath, Resource, Result};
use regex::Regex;
use serde_json::{Map, Value};

use crate::filters::ops::{Matcher, Operand, Operator, ValueType};
use crate::filters::Filter;

/// The comparison side of a filter
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    /// No value given (presence operators)
    None,
    Literal(Value),
    /// Resolved from the resource being evaluated
    Lookup {
        key: KeyPath,
        default: Option<Value>,
    },
}

impl ValueSpec {
    /// Parse a `value` field; `{type: resource, key: ...}` is a lookup
    pub fn parse(type_name: &str, field: &str, value: Option<&Value>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(ValueSpec::None);
        };
        if let Value::Object(map) = value {
            if map.get("type").and_then(Value::as_str) == Some("resource") {
                let key = map
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::validation(type_name, field, "lookup requires a key"))?;
                let key = KeyPath::parse(key)
                    .map_err(|e| Error::validation(type_name, field, e.to_string()))?;
                return Ok(ValueSpec::Lookup {
                    key,
                    default: map.get("default-value").cloned(),
                });
            }
        }
        Ok(ValueSpec::Literal(value.clone()))
    }

    pub fn literal(&self) -> Option<&Value> {
        match self {
            ValueSpec::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Resolve against `resource`; a failed lookup without a default is absent
    pub fn resolve(&self, resource: &Resource) -> Operand {
        match self {
            ValueSpec::None => Operand::Absent,
            ValueSpec::Literal(v) => Operand::Json(v.clone()),
            ValueSpec::Lookup { key, default } => match resource.resolve(key) {
                Ok(v) => Operand::Json(v.clone()),
                Err(_) => default.clone().map(Operand::Json).unwrap_or(Operand::Absent),
            },
        }
    }

    /// Resolve to a JSON value, for actions that write the result
    pub fn resolve_value(&self, resource: &Resource) -> Option<Value> {
        match self.resolve(resource) {
            Operand::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Key/operator/value comparison against a resource
#[derive(Debug, Clone)]
pub struct ValueFilter {
    type_name: String,
    key: Option<KeyPath>,
    op: Operator,
    value: ValueSpec,
    value_type: Option<ValueType>,
    value_regex: Option<Regex>,
    matcher: Option<Matcher>,
}

impl ValueFilter {
    /// Build from a declaration, reporting errors under `type_name`
    pub fn from_data(type_name: &str, data: &Value) -> Result<Self> {
        let key = match data.get("key") {
            None => None,
            Some(Value::String(k)) => Some(
                KeyPath::parse(k).map_err(|e| Error::validation(type_name, "key", e.to_string()))?,
            ),
            Some(other) => {
                return Err(Error::validation(
                    type_name,
                    "key",
                    format!("expected a string, got {}", other),
                ))
            }
        };

        let mut value = ValueSpec::parse(type_name, "value", data.get("value"))?;
        let op = match data.get("op") {
            Some(Value::String(name)) => Operator::parse(name).ok_or_else(|| {
                Error::validation(type_name, "op", format!("unknown operator '{}'", name))
            })?,
            Some(other) => {
                return Err(Error::validation(
                    type_name,
                    "op",
                    format!("expected a string, got {}", other),
                ))
            }
            // `value: absent` and friends
            None => match value.literal().and_then(Value::as_str).and_then(Operator::parse) {
                Some(op) if op.is_presence() => {
                    value = ValueSpec::None;
                    op
                }
                _ => Operator::Eq,
            },
        };

        let value_type = match data.get("value_type") {
            None => None,
            Some(v) => Some(v.as_str().and_then(ValueType::parse).ok_or_else(|| {
                Error::validation(type_name, "value_type", format!("unknown value type {}", v))
            })?),
        };

        let value_regex = match data.get("value_regex") {
            None => None,
            Some(v) => {
                let pattern = v.as_str().ok_or_else(|| {
                    Error::validation(type_name, "value_regex", "expected a string")
                })?;
                Some(
                    Regex::new(pattern)
                        .map_err(|e| Error::validation(type_name, "value_regex", e.to_string()))?,
                )
            }
        };

        let matcher = match (op.takes_pattern(), value.literal()) {
            (true, Some(Value::String(pattern))) => Some(
                op.compile(pattern)
                    .map_err(|e| Error::validation(type_name, "value", e))?,
            ),
            _ => None,
        };

        Ok(Self {
            type_name: type_name.to_string(),
            key,
            op,
            value,
            value_type,
            value_regex,
            matcher,
        })
    }

    /// `key op value` with a literal value
    pub fn new(key: &str, op: Operator, value: Value) -> Result<Self> {
        let mut data = Map::new();
        data.insert("key".to_string(), Value::from(key));
        data.insert("op".to_string(), Value::from(op.name()));
        if !op.is_presence() {
            data.insert("value".to_string(), value);
        }
        Self::from_data("value", &Value::Object(data))
    }

    pub fn key(&self) -> Option<&KeyPath> {
        self.key.as_ref()
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    /// Semantic checks on the operator/value pair, without the key
    pub fn validate_comparison(&self) -> Result<()> {
        let t = self.type_name.as_str();

        if !self.op.is_presence() && self.value == ValueSpec::None {
            return Err(Error::validation(
                t,
                "value",
                format!("required for operator {}", self.op),
            ));
        }

        if let Some(literal) = self.value.literal() {
            if self.op.takes_list() && !literal.is_array() {
                return Err(Error::validation(
                    t,
                    "value",
                    format!("operator {} requires a list", self.op),
                ));
            }
            if self.op.takes_pattern() && !literal.is_string() {
                return Err(Error::validation(
                    t,
                    "value",
                    format!("operator {} requires a string pattern", self.op),
                ));
            }
            if self.value_type.is_some_and(|vt| vt.takes_days()) && !literal.is_number() {
                return Err(Error::validation(
                    t,
                    "value",
                    "age and expiration take a number of days",
                ));
            }
        }

        if let Some(re) = &self.value_regex {
            // group 0 is the whole match
            if re.captures_len() != 2 {
                return Err(Error::validation(
                    t,
                    "value_regex",
                    "must contain exactly one capture group",
                ));
            }
        }
        Ok(())
    }

    /// Match a resource
    pub fn matches(&self, resource: &Resource) -> bool {
        let found = self.key.as_ref().and_then(|k| resource.resolve(k).ok());
        self.compare(found, resource)
    }

    /// Match a resource with extra fields layered over it
    ///
    /// `overlay` is consulted first for the key's top-level field.
    pub fn matches_with(&self, resource: &Resource, overlay: &Map<String, Value>) -> bool {
        let found = self
            .key
            .as_ref()
            .and_then(|k| k.resolve_map(overlay).ok().or_else(|| resource.resolve(k).ok()));
        self.compare(found, resource)
    }

    /// Compare an already resolved resource value
    ///
    /// `resource` is still needed for lookup values.
    pub fn compare(&self, found: Option<&Value>, resource: &Resource) -> bool {
        let mut left = Operand::from_resolved(found);
        if let Some(re) = &self.value_regex {
            left = extract(re, left);
        }
        let right = self.value.resolve(resource);

        let (left, right) = match self.value_type {
            Some(vt) => vt.coerce(left, right, Utc::now()),
            None => (left, right),
        };
        self.op.apply(&left, &right, self.matcher.as_ref())
    }
}

/// First capture group of a string value; anything else is absent
fn extract(re: &Regex, operand: Operand) -> Operand {
    let Operand::Json(Value::String(s)) = &operand else {
        return Operand::Absent;
    };
    re.captures(s)
        .and_then(|c| c.get(1))
        .map(|m| Operand::Json(Value::String(m.as_str().to_string())))
        .unwrap_or(Operand::Absent)
}

#[async_trait]
impl Filter for ValueFilter {
    fn filter_type(&self) -> &str {
        &self.type_name
    }

    fn validate(&self) -> Result<()> {
        if self.key.is_none() {
            return Err(Error::validation(&self.type_name, "key", "required"));
        }
        self.validate_comparison()
    }

    async fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        Ok(resources.into_iter().filter(|r| self.matches(r)).collect())
    }
}
