//! Stratus Huawei Cloud Provider
//!
//! ## Module Structure
//!
//! - `config` - Settings from `HW_*` variables and the shared CLI config file
//! - `signer` - AK/SK request signing
//! - `client` - Per-service REST client
//! - `jobs` - Waiting on asynchronous jobs
//! - `resources` - Resource kinds and their registry
//! - `provider` - HuaweiCloudProvider implementation

pub mod client;
pub mod config;
pub mod jobs;
pub mod provider;
pub mod resources;
pub mod signer;

// Re-export main types
pub use client::{ClientError, ServiceClient};
pub use config::{Config, ConfigError, Credentials};
pub use provider::HuaweiCloudProvider;

use stratus_core::provider::{BoxFuture, Provider, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State};

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for HuaweiCloudProvider {
    fn name(&self) -> &'static str {
        "huaweicloud"
    }

    fn resource_types(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    fn read(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.registry.read(&id, &identifier).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.registry.create(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.registry.update(&id, &identifier, &from, &to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.registry.delete(&id, &identifier).await })
    }
}
