//! Custodian Core
//!
//! Core types, traits, and utilities shared across Custodian components.
//!
//! This crate provides:
//! - The [`Resource`] snapshot model and key path resolution
//! - Error types and result handling
//! - The provider boundary ([`ApiClient`], [`ResourceSource`]) and
//!   classified [`ProviderError`]s
//! - A [`RetryPolicy`] for transient provider errors

pub mod error;
pub mod provider;
pub mod resource;
pub mod retry;

pub use error::{Error, Result};
pub use provider::{ApiClient, ApiRequest, ErrorClass, ProviderError, ResourceSource};
pub use resource::{annotation_key, KeyPath, NotFound, Resource, ANNOTATION_PREFIX};
pub use retry::{RetryConfig, RetryPolicy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::provider::{ApiClient, ApiRequest, ProviderError, ResourceSource};
    pub use crate::resource::{KeyPath, Resource};
    pub use crate::retry::RetryPolicy;
}
