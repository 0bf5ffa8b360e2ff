//! Provider - Traits abstracting resource operations
//!
//! A Provider defines operations for a specific cloud. Each resource type it
//! manages is a [`ResourceKind`] with explicit CRUD methods; the provider
//! dispatches to kinds through a [`ResourceRegistry`](crate::registry::ResourceRegistry).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;

use crate::resource::{Resource, ResourceId, State};
use crate::wait::WaitError;

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl<E> From<WaitError<E>> for ProviderError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: WaitError<E>) -> Self {
        ProviderError::new(error.to_string()).with_cause(error)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long each lifecycle operation may wait for the cloud to converge
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(15 * 60),
        }
    }
}

impl Timeouts {
    /// Same timeout for every operation
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            update: timeout,
            delete: timeout,
        }
    }
}

/// CRUD operations for one resource type
///
/// Implementations hold their service client; nothing is looked up from
/// global state.
#[async_trait]
pub trait ResourceKind: Send + Sync {
    /// Resource type name (e.g., "dcs_instance")
    fn name(&self) -> &'static str;

    /// Create the resource and wait until it is usable.
    ///
    /// Returns State with identifier set to the cloud-side ID.
    async fn create(&self, resource: &Resource) -> ProviderResult<State>;

    /// Get the current state of a resource.
    ///
    /// Returns `State::not_found()` if the resource does not exist.
    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State>;

    /// Update a resource in place
    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State>;

    /// Delete a resource and wait until it is gone
    async fn delete(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()>;
}

/// Main Provider trait
///
/// Each cloud provider implements this trait.
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "huaweicloud")
    fn name(&self) -> &'static str;

    /// Names of the resource types this Provider can handle
    fn resource_types(&self) -> Vec<&'static str>;

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource does not exist.
    fn read(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource
    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource
    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<&'static str> {
        (**self).resource_types()
    }

    fn read(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(id, identifier)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(id, identifier, from, to)
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(id, identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_provider_error_display() {
        let error = ProviderError::new("Operation failed")
            .for_resource(ResourceId::new("dcs_instance", "cache"));
        assert_eq!(error.to_string(), "[dcs_instance.cache] Operation failed");
    }

    #[test]
    fn test_wait_error_converts_with_context() {
        let wait: WaitError<std::io::Error> = WaitError::NotFound {
            resource: "dcs_instance/abc".to_string(),
            checks: 21,
        };
        let error: ProviderError = wait.into();
        assert_eq!(
            error.message,
            "dcs_instance/abc was not found after 21 consecutive checks"
        );
        assert!(error.source().is_some());
    }
}
