//! Custodian Policy Engine
//!
//! Declarative filter/action evaluation for cloud governance policies.
//!
//! Policies are defined in YAML and specify:
//! - A resource type to evaluate
//! - Filters (value comparisons, boolean composition, remote data)
//! - Actions (labels, lifecycle methods, notifications, scheduled ops)
//!
//! Declarations are validated against per-type JSON schemas through the
//! [`FilterRegistry`] and [`ActionRegistry`] before any resource is fetched.

pub mod actions;
pub mod config;
pub mod engine;
pub mod filters;
pub mod manager;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod time;

pub use actions::{filter_resources, Action, ActionBase, ActionResults};
pub use config::{EngineConfig, RemoteDataConfig};
pub use engine::{LoadedPolicy, PolicyEngine, RunReport};
pub use filters::{Filter, Operator, ValueFilter, ValueType};
pub use manager::ResourceManager;
pub use policy::{Policy, PolicyCollection};
pub use registry::{ActionFactory, ActionRegistry, FilterFactory, FilterRegistry};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::actions::{Action, ActionBase, ActionResults};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{LoadedPolicy, PolicyEngine, RunReport};
    pub use crate::filters::{Filter, ValueFilter};
    pub use crate::manager::ResourceManager;
    pub use crate::policy::{Policy, PolicyCollection};
    pub use crate::registry::{ActionRegistry, FilterRegistry};
}
