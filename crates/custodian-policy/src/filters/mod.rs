//! Resource filters
//!
//! A filter narrows a batch of resources. Filters are built from
//! declarations through the [`FilterRegistry`](crate::registry::FilterRegistry),
//! validated before any resource is fetched, and composed with `and`, `or`
//! and `not`.

pub mod boolean;
pub mod marked;
pub mod ops;
pub mod value;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use custodian_core::{Resource, Result};
use serde_json::{json, Value};

use crate::manager::ResourceManager;
use crate::registry::FilterRegistry;
use crate::schema;

pub use boolean::{BooleanFilter, BooleanOp};
pub use marked::MarkedForOpFilter;
pub use ops::{Operand, Operator, ValueType};
pub use value::{ValueFilter, ValueSpec};

/// A predicate over batches of resources
#[async_trait]
pub trait Filter: Send + Sync + fmt::Debug {
    /// Registered type name
    fn filter_type(&self) -> &str;

    /// Check the declaration without touching any resource
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Keep the matching resources, in input order
    async fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>>;
}

fn value_factory(
    data: &Value,
    _registry: &FilterRegistry,
    _manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    Ok(Arc::new(ValueFilter::from_data("value", data)?))
}

fn boolean_factory(
    op: BooleanOp,
    data: &Value,
    registry: &FilterRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    let specs = data
        .get("filters")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let filters = registry.parse_list(specs, manager)?;
    Ok(Arc::new(BooleanFilter::new(
        op,
        filters,
        manager.id_field(),
    )))
}

fn and_factory(
    data: &Value,
    registry: &FilterRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    boolean_factory(BooleanOp::And, data, registry, manager)
}

fn or_factory(
    data: &Value,
    registry: &FilterRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    boolean_factory(BooleanOp::Or, data, registry, manager)
}

fn not_factory(
    data: &Value,
    registry: &FilterRegistry,
    manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    boolean_factory(BooleanOp::Not, data, registry, manager)
}

fn marked_factory(
    data: &Value,
    _registry: &FilterRegistry,
    _manager: &ResourceManager,
) -> Result<Arc<dyn Filter>> {
    Ok(Arc::new(MarkedForOpFilter::from_data(data)?))
}

/// Register the built-in filters
pub fn register_defaults(registry: &mut FilterRegistry) -> Result<()> {
    registry.register(
        "value",
        schema::type_schema("value", schema::value_properties(), &[]),
        value_factory,
    )?;
    for (name, factory) in [
        ("and", and_factory as crate::registry::FilterFactory),
        ("or", or_factory),
        ("not", not_factory),
    ] {
        registry.register(
            name,
            schema::type_schema(name, json!({ "filters": schema::filter_list() }), &["filters"]),
            factory,
        )?;
    }
    registry.register(
        "marked-for-op",
        schema::type_schema(
            "marked-for-op",
            json!({
                "label": { "type": "string" },
                "op": { "type": "string" },
                "tz": { "type": "string" },
                "skew": { "type": "number", "minimum": 0 },
                "skew_hours": { "type": "number", "minimum": 0 },
            }),
            &[],
        ),
        marked_factory,
    )?;
    Ok(())
}
