//! Process-wide lookup of providers by id.
//!
//! Built once at startup and read mostly afterwards. Clones share the same
//! map, so a registry can be handed to every component that needs one.

use dashmap::DashMap;
use std::sync::Arc;

use crate::provider::ProviderRef;

/// Concurrent map from provider id to provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<DashMap<String, ProviderRef>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `id`, replacing any previous one.
    pub fn register(&self, id: impl Into<String>, provider: ProviderRef) {
        let id = id.into();
        if self.providers.insert(id.clone(), provider).is_some() {
            tracing::debug!("Replaced provider {}", id);
        } else {
            tracing::debug!("Registered provider {}", id);
        }
    }

    /// Look up a provider.
    pub fn find(&self, id: &str) -> Option<ProviderRef> {
        self.providers.get(id).map(|p| p.value().clone())
    }

    /// Ids of all registered providers, in no particular order.
    pub fn list(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.key().clone()).collect()
    }

    /// Remove a provider; returns whether it was registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.providers.remove(id).is_some()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .finish()
    }
}
