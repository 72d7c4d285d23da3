//! Backend selection by alias
//!
//! The configured `backend` string is looked up here. `memory` and `file`
//! are registered out of the box; embedders add their own (an SQL adapter,
//! say) with [`BackendRegistry::register`] before switching to it.

use std::sync::Arc;

use dashmap::DashMap;
use sitegate_engine::file::FILE_BACKEND;
use sitegate_engine::memory::MEMORY_BACKEND;
use sitegate_engine::{BackendResult, FileBackend, MemoryBackend, PermissionBackend};

use crate::config::PermissionsConfig;
use crate::error::{PermissionError, PermissionResult};

/// Constructor for a backend, given the engine configuration
pub type BackendFactory =
    Box<dyn Fn(&PermissionsConfig) -> BackendResult<Arc<dyn PermissionBackend>> + Send + Sync>;

/// Alias → constructor table
pub struct BackendRegistry {
    factories: DashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Registry with the bundled `memory` and `file` backends
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(MEMORY_BACKEND, |_| Ok(Arc::new(MemoryBackend::new())));
        registry.register(FILE_BACKEND, |config| {
            let backend =
                FileBackend::new(&config.file.path, config.file.default_permissions.clone())?;
            Ok(Arc::new(backend))
        });
        registry
    }

    /// Register (or replace) a backend constructor under `alias`
    pub fn register<F>(&self, alias: &str, factory: F)
    where
        F: Fn(&PermissionsConfig) -> BackendResult<Arc<dyn PermissionBackend>> + Send + Sync + 'static,
    {
        let alias = alias.trim().to_lowercase();
        if self.factories.insert(alias.clone(), Box::new(factory)).is_some() {
            tracing::debug!("Replaced permission backend '{}'", alias);
        }
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.factories.contains_key(&alias.trim().to_lowercase())
    }

    /// Registered aliases, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        aliases.sort();
        aliases
    }

    /// Construct the backend registered under `alias`
    pub fn create(
        &self,
        alias: &str,
        config: &PermissionsConfig,
    ) -> PermissionResult<Arc<dyn PermissionBackend>> {
        let key = alias.trim().to_lowercase();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| PermissionError::UnknownBackend(alias.to_string()))?;
        Ok(factory.value()(config)?)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
