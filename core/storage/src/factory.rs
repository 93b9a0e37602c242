//! Adapter factory table for building adapters from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use strata_common::{Error, Result};
use crate::provider::StorageAdapter;

/// Factory function type for creating adapters.
pub type AdapterFactory = Box<dyn Fn(Value) -> Result<Arc<dyn StorageAdapter>> + Send + Sync>;

/// Table of adapter factories keyed by backend type name.
///
/// Provider configuration names a backend type ("memory", "local", "http")
/// plus a JSON blob; the table turns that pair into a live adapter.
pub struct AdapterFactories {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterFactories {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register an adapter factory.
    ///
    /// # Errors
    /// - Returns error if the backend type is already registered
    pub fn register(&mut self, backend: impl Into<String>, factory: AdapterFactory) -> Result<()> {
        let backend = backend.into();
        if self.factories.contains_key(&backend) {
            return Err(Error::InvalidInput(format!(
                "Backend type '{}' is already registered",
                backend
            )));
        }
        self.factories.insert(backend, factory);
        Ok(())
    }

    /// Build an adapter for a backend type and configuration.
    ///
    /// # Errors
    /// - Backend type not registered
    /// - Configuration invalid for the backend
    pub fn create(&self, backend: &str, config: Value) -> Result<Arc<dyn StorageAdapter>> {
        let factory = self.factories.get(backend).ok_or_else(|| {
            Error::InvalidInput(format!("Backend type '{}' is not registered", backend))
        })?;
        factory(config)
    }

    /// Get registered backend type names, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend type is registered.
    pub fn has_backend(&self, backend: &str) -> bool {
        self.factories.contains_key(backend)
    }
}

impl Default for AdapterFactories {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a table with the built-in adapters.
pub fn create_default_factories() -> AdapterFactories {
    let mut table = AdapterFactories::new();

    let builtins: [(&str, AdapterFactory); 3] = [
        (
            "memory",
            Box::new(|_config| Ok(Arc::new(crate::memory::MemoryAdapter::new()))),
        ),
        (
            "local",
            Box::new(|config| {
                let root = config
                    .get("root")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        Error::InvalidInput("Local backend requires 'root' path".to_string())
                    })?;
                Ok(Arc::new(crate::local::LocalAdapter::new(root)?))
            }),
        ),
        (
            "http",
            Box::new(|config| {
                let config: crate::http::HttpAdapterConfig = serde_json::from_value(config)?;
                Ok(Arc::new(crate::http::HttpAdapter::new(config)?))
            }),
        ),
    ];

    for (name, factory) in builtins {
        // Names are distinct literals; registration into a fresh table cannot collide.
        let _ = table.register(name, factory);
    }

    table
}
