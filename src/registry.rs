//! Named provider registry
//!
//! One registry exists per capability per [`Framework`](crate::framework::Framework).
//! Lookups and registrations go through a `DashMap`, so node invocations
//! running in parallel can resolve while a plugin registers.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::ConfigurationError;

/// Name → implementation table for one capability (`C` is the trait object)
pub struct ProviderRegistry<C: ?Sized + Send + Sync> {
    service: &'static str,
    providers: DashMap<String, Arc<C>>,
}

impl<C: ?Sized + Send + Sync> ProviderRegistry<C> {
    /// Empty registry; `service` names the capability in error messages
    pub fn new(service: &'static str) -> Self {
        Self {
            service,
            providers: DashMap::new(),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Register a provider under `name`, replacing (and returning) any previous one
    pub fn register(&self, name: impl Into<String>, provider: Arc<C>) -> Option<Arc<C>> {
        let name = name.into();
        debug!(service = self.service, provider = %name, "registering provider");
        self.providers.insert(name, provider)
    }

    /// Look up a provider by name
    pub fn resolve(&self, name: &str) -> Result<Arc<C>, ConfigurationError> {
        match self.providers.get(name) {
            Some(entry) => Ok(Arc::clone(entry.value())),
            None => Err(ConfigurationError::ProviderNotFound {
                service: self.service,
                name: name.to_string(),
                available: self.names(),
            }),
        }
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<C>> {
        self.providers.remove(name).map(|(_, provider)| provider)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl<C: ?Sized + Send + Sync> fmt::Debug for ProviderRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("service", &self.service)
            .field("providers", &self.names())
            .finish()
    }
}
