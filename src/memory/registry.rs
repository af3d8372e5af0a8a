//! Memory registry: one lazily created store per owner.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::MemoryConfig;
use crate::error::{ConfigError, MemoryError};
use crate::memory::link::{MemoryLink, MemoryStats};

/// A store shared between callers; the mutex serializes access per owner.
pub type SharedMemoryLink = Arc<Mutex<MemoryLink>>;

/// Aggregated statistics across every owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMemoryStats {
    pub total_agents: usize,
    pub total_memories: usize,
    pub agent_stats: BTreeMap<String, MemoryStats>,
}

/// Multiplexes memory stores by owner ID.
pub struct MemoryRegistry {
    config: MemoryConfig,
    links: RwLock<HashMap<String, SharedMemoryLink>>,
}

impl MemoryRegistry {
    /// Create an empty registry. `config` applies to every store it creates.
    pub fn new(config: MemoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            links: RwLock::new(HashMap::new()),
        })
    }

    /// Get the owner's store, creating it with the default capacity.
    pub async fn get_or_create(&self, owner_id: &str) -> SharedMemoryLink {
        let mut links = self.links.write().await;
        links
            .entry(owner_id.to_string())
            .or_insert_with(|| {
                info!(agent_id = %owner_id, "Created memory store");
                Arc::new(Mutex::new(MemoryLink::with_validated_config(
                    owner_id,
                    self.config.clone(),
                )))
            })
            .clone()
    }

    /// Get the owner's store, creating it with `max_entries` on first use.
    ///
    /// The capacity is ignored when the store already exists.
    pub async fn get_or_create_with_capacity(
        &self,
        owner_id: &str,
        max_entries: usize,
    ) -> Result<SharedMemoryLink, MemoryError> {
        let mut links = self.links.write().await;
        if let Some(link) = links.get(owner_id) {
            return Ok(link.clone());
        }

        let config = MemoryConfig {
            max_entries,
            ..self.config.clone()
        };
        let link = Arc::new(Mutex::new(MemoryLink::new(owner_id, config)?));
        links.insert(owner_id.to_string(), link.clone());
        info!(agent_id = %owner_id, max_entries, "Created memory store");
        Ok(link)
    }

    /// Get the owner's store if it exists.
    pub async fn get(&self, owner_id: &str) -> Option<SharedMemoryLink> {
        self.links.read().await.get(owner_id).cloned()
    }

    /// Drop the owner's store and every entry in it.
    pub async fn remove(&self, owner_id: &str) -> bool {
        let removed = self.links.write().await.remove(owner_id).is_some();
        if removed {
            info!(agent_id = %owner_id, "Removed memory store");
        }
        removed
    }

    /// IDs of every owner with a store, sorted.
    pub async fn owners(&self) -> Vec<String> {
        let mut owners: Vec<String> = self.links.read().await.keys().cloned().collect();
        owners.sort();
        owners
    }

    /// Per-owner statistics plus totals.
    pub async fn global_stats(&self) -> GlobalMemoryStats {
        let links: Vec<(String, SharedMemoryLink)> = self
            .links
            .read()
            .await
            .iter()
            .map(|(owner, link)| (owner.clone(), link.clone()))
            .collect();

        let mut agent_stats = BTreeMap::new();
        for (owner, link) in links {
            agent_stats.insert(owner, link.lock().await.get_stats());
        }

        GlobalMemoryStats {
            total_agents: agent_stats.len(),
            total_memories: agent_stats.values().map(|s| s.total_memories).sum(),
            agent_stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::link::StoreOptions;
    use serde_json::json;

    fn registry() -> MemoryRegistry {
        MemoryRegistry::new(MemoryConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let config = MemoryConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert!(MemoryRegistry::new(config).is_err());
    }

    #[tokio::test]
    async fn get_or_create_returns_same_store() {
        let registry = registry();
        let first = registry.get_or_create("agent-a").await;
        first
            .lock()
            .await
            .store("k", json!(1), StoreOptions::new())
            .unwrap();

        let second = registry.get_or_create("agent-a").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.retrieve("k"), Some(json!(1)));
    }

    #[tokio::test]
    async fn first_capacity_wins() {
        let registry = registry();
        let link = registry
            .get_or_create_with_capacity("agent-a", 50)
            .await
            .unwrap();
        assert_eq!(link.lock().await.max_entries(), 50);

        let again = registry
            .get_or_create_with_capacity("agent-a", 5)
            .await
            .unwrap();
        assert_eq!(again.lock().await.max_entries(), 50);

        let default = registry.get_or_create("agent-b").await;
        assert_eq!(default.lock().await.max_entries(), 10_000);
    }

    #[tokio::test]
    async fn zero_capacity_rejected_on_create() {
        let registry = registry();
        assert!(registry
            .get_or_create_with_capacity("agent-a", 0)
            .await
            .is_err());
        assert!(registry.get("agent-a").await.is_none());
    }

    #[tokio::test]
    async fn remove_drops_store() {
        let registry = registry();
        let link = registry.get_or_create("agent-a").await;
        link.lock()
            .await
            .store("k", json!(1), StoreOptions::new())
            .unwrap();

        assert!(registry.remove("agent-a").await);
        assert!(!registry.remove("agent-a").await);
        assert!(registry.owners().await.is_empty());

        let fresh = registry.get_or_create("agent-a").await;
        assert!(fresh.lock().await.is_empty());
    }

    #[tokio::test]
    async fn global_stats_aggregates() {
        let registry = registry();
        for (owner, count) in [("agent-a", 2), ("agent-b", 3)] {
            let link = registry.get_or_create(owner).await;
            let mut link = link.lock().await;
            for i in 0..count {
                link.store(format!("k{i}"), json!(i), StoreOptions::new())
                    .unwrap();
            }
        }

        let stats = registry.global_stats().await;
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.total_memories, 5);
        assert_eq!(stats.agent_stats["agent-b"].total_memories, 3);
        assert_eq!(registry.owners().await, vec!["agent-a", "agent-b"]);
    }
}
