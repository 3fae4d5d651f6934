//! Provider registry

use crate::catalog::ProviderDescriptor;
use crate::error::{CloudError, Result};
use crate::provider::CloudProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// Provider name → adapter
///
/// Populated at startup and shared read-only afterwards (`Arc<ProviderRegistry>`).
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `name`, replacing and returning any prior registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn CloudProvider>,
    ) -> Option<Arc<dyn CloudProvider>> {
        let name = name.into();
        tracing::debug!(provider = %name, "Registering cloud provider");
        self.providers.insert(name, provider)
    }

    /// Register under the provider's own name.
    pub fn with_provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        let name = provider.name().to_string();
        self.register(name, provider);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CloudProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::ProviderNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors of all providers, sorted by registration name
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.names()
            .iter()
            .filter_map(|name| self.providers.get(name))
            .map(|p| p.descriptor())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
