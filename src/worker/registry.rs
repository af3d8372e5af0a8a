//! Handler registry mapping task types to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::worker::task::TaskHandler;

/// Registry of task handlers, keyed by task type.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler, replacing any existing one for the same type.
    pub async fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        let replaced = self
            .handlers
            .write()
            .await
            .insert(task_type.clone(), handler)
            .is_some();
        tracing::info!(task_type = %task_type, replaced, "Registered handler");
    }

    /// Handler for `task_type`, if one is registered.
    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task_type).cloned()
    }

    /// Whether tasks of this type would reach a real handler.
    pub async fn has(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct ConstHandler(Value);

    #[async_trait]
    impl TaskHandler for ConstHandler {
        async fn handle(&self, _payload: Value) -> anyhow::Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = HandlerRegistry::new();
        registry
            .register("const", Arc::new(ConstHandler(json!(1))))
            .await;

        assert!(registry.has("const").await);
        assert!(!registry.has("nonexistent").await);

        let handler = registry.get("const").await.unwrap();
        assert_eq!(handler.handle(json!(null)).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn register_replaces() {
        let registry = HandlerRegistry::new();
        registry
            .register("const", Arc::new(ConstHandler(json!(1))))
            .await;
        registry
            .register("const", Arc::new(ConstHandler(json!(2))))
            .await;

        assert_eq!(registry.list().await, vec!["const".to_string()]);
        let handler = registry.get("const").await.unwrap();
        assert_eq!(handler.handle(json!(null)).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let registry = HandlerRegistry::new();
        for task_type in ["recall", "echo", "remember"] {
            registry
                .register(task_type, Arc::new(ConstHandler(json!(null))))
                .await;
        }

        assert_eq!(registry.list().await, ["echo", "recall", "remember"]);
    }
}
