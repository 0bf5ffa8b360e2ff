//! Registry - Resource kinds by type name

use std::collections::BTreeMap;

use crate::provider::{ProviderError, ProviderResult, ResourceKind};
use crate::resource::{Resource, ResourceId, State};

/// Map from resource type name to its CRUD implementation
#[derive(Default)]
pub struct ResourceRegistry {
    kinds: BTreeMap<&'static str, Box<dyn ResourceKind>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind, replacing any previous kind of the same name
    pub fn register(&mut self, kind: impl ResourceKind + 'static) -> &mut Self {
        self.kinds.insert(kind.name(), Box::new(kind));
        self
    }

    pub fn with(mut self, kind: impl ResourceKind + 'static) -> Self {
        self.register(kind);
        self
    }

    /// Look up a kind by resource type name
    pub fn get(&self, resource_type: &str) -> ProviderResult<&dyn ResourceKind> {
        self.kinds
            .get(resource_type)
            .map(|kind| kind.as_ref())
            .ok_or_else(|| ProviderError::new(format!("Unknown resource type: {}", resource_type)))
    }

    /// Registered type names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.kinds.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let kind = self
            .get(&resource.id.resource_type)
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        kind.create(resource).await
    }

    pub async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let kind = self
            .get(&id.resource_type)
            .map_err(|e| e.for_resource(id.clone()))?;
        kind.read(id, identifier).await
    }

    pub async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let kind = self
            .get(&id.resource_type)
            .map_err(|e| e.for_resource(id.clone()))?;
        kind.update(id, identifier, from, to).await
    }

    pub async fn delete(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let kind = self
            .get(&id.resource_type)
            .map_err(|e| e.for_resource(id.clone()))?;
        kind.delete(id, identifier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    // Mock kind for testing
    struct MockKind;

    #[async_trait]
    impl ResourceKind for MockKind {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn create(&self, resource: &Resource) -> ProviderResult<State> {
            Ok(State::existing(resource.id.clone(), resource.attributes.clone())
                .with_identifier("mock-id-123"))
        }

        async fn read(&self, id: &ResourceId, _identifier: &str) -> ProviderResult<State> {
            Ok(State::not_found(id.clone()))
        }

        async fn update(
            &self,
            id: &ResourceId,
            _identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> ProviderResult<State> {
            Ok(State::existing(id.clone(), to.attributes.clone()))
        }

        async fn delete(&self, _id: &ResourceId, _identifier: &str) -> ProviderResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_by_resource_type() {
        let registry = ResourceRegistry::new().with(MockKind);
        let resource = Resource::new("mock", "example");

        let state = registry.create(&resource).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.identifier, Some("mock-id-123".to_string()));

        let state = registry.read(&resource.id, "mock-id-123").await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let registry = ResourceRegistry::new().with(MockKind);
        let id = ResourceId::new("vpc", "main");

        let error = registry.delete(&id, "vpc-1").await.unwrap_err();
        assert_eq!(error.to_string(), "[vpc.main] Unknown resource type: vpc");
    }

    #[test]
    fn names_are_sorted() {
        let registry = ResourceRegistry::new().with(MockKind);
        assert_eq!(registry.names(), vec!["mock"]);
        assert_eq!(registry.len(), 1);
    }
}
