// SPDX-License-Identifier: MIT

use crate::runtime::Module;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registration table for in-process modules, keyed by module id
#[derive(Clone)]
pub struct ModuleRegistry {
    modules: Arc<RwLock<HashMap<String, Arc<dyn Module>>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, module: Arc<dyn Module>) {
        let mut modules = self.modules.write().await;
        log::debug!("Registering module {}", module.id());
        modules.insert(module.id().to_string(), module);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Module>> {
        let modules = self.modules.read().await;
        modules.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let modules = self.modules.read().await;
        let mut ids: Vec<String> = modules.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::error::Error;

    /// A mock module for testing
    struct MockModule {
        id: String,
    }

    impl MockModule {
        fn new(id: &str) -> Self {
            Self { id: id.to_string() }
        }
    }

    #[async_trait]
    impl Module for MockModule {
        fn id(&self) -> &str {
            &self.id
        }

        async fn invoke(&self, _params: Map<String, Value>) -> Result<Value, Box<dyn Error + Send + Sync>> {
            Ok(json!({"result": "mock"}))
        }
    }

    #[tokio::test]
    async fn test_register_and_get_module() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(MockModule::new("text.tools.split"))).await;

        let retrieved = registry.get("text.tools.split").await;
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().id(), "text.tools.split");
    }

    #[tokio::test]
    async fn test_get_nonexistent_module() {
        let registry = ModuleRegistry::new();
        assert!(registry.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_ids_sorted() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(MockModule::new("b.run"))).await;
        registry.register(Arc::new(MockModule::new("a.run"))).await;
        registry.register(Arc::new(MockModule::new("b.run"))).await;

        assert_eq!(registry.ids().await, vec!["a.run", "b.run"]);
    }

    #[tokio::test]
    async fn test_registry_is_clone() {
        let registry = ModuleRegistry::new();
        let cloned = registry.clone();

        // Registering on clone should be visible to original
        cloned.register(Arc::new(MockModule::new("m.one"))).await;
        assert!(registry.get("m.one").await.is_some());
    }
}
