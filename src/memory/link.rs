//! Per-owner memory store with TTL expiry and category index.
//!
//! Expiry is lazy. An expired entry is removed when a read path touches it,
//! or by the sweep `store` runs once the held entry count reaches
//! `cleanup_threshold × max_entries`. There is no background sweeper.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::memory::entry::{MemoryEntry, MemoryRecord};

/// Optional arguments to [`MemoryLink::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub category: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub ttl: Option<Duration>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Point-in-time usage statistics of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub agent_id: String,
    pub total_memories: usize,
    pub expired_memories: usize,
    pub active_memories: usize,
    pub max_entries: usize,
    pub usage_percentage: f64,
    /// Number of keys indexed per category.
    pub categories: BTreeMap<String, usize>,
}

/// Key → value memory of a single owner.
#[derive(Debug)]
pub struct MemoryLink {
    agent_id: String,
    config: MemoryConfig,
    memories: HashMap<String, MemoryEntry>,
    /// Category → keys in insertion order. Every key listed here is in `memories`.
    categories: HashMap<String, Vec<String>>,
}

impl MemoryLink {
    /// Create an empty store for `agent_id`.
    pub fn new(agent_id: impl Into<String>, config: MemoryConfig) -> Result<Self, MemoryError> {
        config.validate().map_err(|e| match e {
            crate::error::ConfigError::InvalidValue { key, message } => {
                MemoryError::InvalidArgument {
                    name: key,
                    reason: message,
                }
            }
        })?;
        Ok(Self::with_validated_config(agent_id, config))
    }

    /// Create an empty store with the default threshold and the given capacity.
    pub fn with_capacity(
        agent_id: impl Into<String>,
        max_entries: usize,
    ) -> Result<Self, MemoryError> {
        Self::new(
            agent_id,
            MemoryConfig {
                max_entries,
                ..Default::default()
            },
        )
    }

    pub(crate) fn with_validated_config(agent_id: impl Into<String>, config: MemoryConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
            memories: HashMap::new(),
            categories: HashMap::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    /// Number of held entries, expired ones included.
    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    /// Whether an entry is held for `key`, expired or not. Does not record an access.
    pub fn contains_key(&self, key: &str) -> bool {
        self.memories.contains_key(key)
    }

    /// Inspect an entry without recording an access or evicting it.
    pub fn entry(&self, key: &str) -> Option<&MemoryEntry> {
        self.memories.get(key)
    }

    /// Names of all categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.categories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Keys indexed under `category`, in insertion order.
    pub fn category_keys(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    /// Insert or overwrite `key`.
    ///
    /// Overwriting resets every field of the entry. A category moves the key
    /// out of any previous category; without one the key keeps its current
    /// membership.
    pub fn store(
        &mut self,
        key: impl Into<String>,
        value: Value,
        options: StoreOptions,
    ) -> Result<(), MemoryError> {
        let key = key.into();
        // Import requires a non-empty key; an empty one could never round-trip.
        if key.is_empty() {
            return Err(MemoryError::InvalidArgument {
                name: "key".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.memories.len() >= self.config.cleanup_trigger() {
            self.cleanup_expired();
        }

        let previous_category = self.memories.get(&key).and_then(|e| e.category.clone());
        let mut entry = MemoryEntry::new(
            key.clone(),
            value,
            options.metadata.unwrap_or_default(),
            options.ttl,
        );

        match options.category.filter(|c| !c.is_empty()) {
            Some(category) => {
                if let Some(previous) = previous_category.filter(|p| *p != category)
                    && let Some(keys) = self.categories.get_mut(&previous)
                {
                    keys.retain(|k| *k != key);
                }
                let keys = self.categories.entry(category.clone()).or_default();
                if !keys.contains(&key) {
                    keys.push(key.clone());
                }
                entry.category = Some(category);
            }
            None => entry.category = previous_category,
        }

        self.memories.insert(key.clone(), entry);

        if self.memories.len() > self.config.max_entries {
            warn!(
                agent_id = %self.agent_id,
                held = self.memories.len(),
                max_entries = self.config.max_entries,
                "Memory store over capacity"
            );
        }

        debug!(agent_id = %self.agent_id, key = %key, "Stored memory");
        Ok(())
    }

    /// Read a live value, recording the access. Expired entries are removed.
    pub fn retrieve(&mut self, key: &str) -> Option<Value> {
        if self.memories.get(key)?.is_expired() {
            self.remove_memory(key);
            debug!(agent_id = %self.agent_id, key = %key, "Evicted expired memory on read");
            return None;
        }
        self.memories.get_mut(key).map(|entry| entry.access().clone())
    }

    /// Read every live value indexed under `category`.
    pub fn retrieve_by_category(&mut self, category: &str) -> BTreeMap<String, Value> {
        let keys = self.categories.get(category).cloned().unwrap_or_default();
        keys.into_iter()
            .filter_map(|key| self.retrieve(&key).map(|value| (key, value)))
            .collect()
    }

    /// Case-insensitive substring search over keys and value text.
    ///
    /// Restricted to `category` when given; an unknown category matches nothing.
    pub fn search(&mut self, query: &str, category: Option<&str>) -> BTreeMap<String, Value> {
        let needle = query.to_lowercase();
        let keys: Vec<String> = match category {
            Some(category) => self.categories.get(category).cloned().unwrap_or_default(),
            None => self.memories.keys().cloned().collect(),
        };

        let now = Utc::now();
        let mut results = BTreeMap::new();
        for key in keys {
            let Some(entry) = self.memories.get(&key) else {
                continue;
            };
            if entry.is_expired_at(now) {
                self.remove_memory(&key);
                continue;
            }

            let hit = key.to_lowercase().contains(&needle)
                || searchable_text(&entry.value).to_lowercase().contains(&needle);
            if hit && let Some(entry) = self.memories.get_mut(&key) {
                let value = entry.access().clone();
                results.insert(key, value);
            }
        }
        results
    }

    /// Replace the value of a live entry and merge metadata.
    ///
    /// Refreshes `accessed_at` but does not count as an access.
    pub fn update(
        &mut self,
        key: &str,
        value: Value,
        metadata: Option<Map<String, Value>>,
    ) -> bool {
        let Some(entry) = self.memories.get(key) else {
            return false;
        };
        if entry.is_expired() {
            self.remove_memory(key);
            return false;
        }

        let Some(entry) = self.memories.get_mut(key) else {
            return false;
        };
        entry.value = value;
        if let Some(metadata) = metadata {
            entry.metadata.extend(metadata);
        }
        entry.accessed_at = Utc::now();

        debug!(agent_id = %self.agent_id, key = %key, "Updated memory");
        true
    }

    /// Remove an entry and scrub it from the category index.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.remove_memory(key).is_some();
        if removed {
            debug!(agent_id = %self.agent_id, key = %key, "Deleted memory");
        }
        removed
    }

    /// Delete every key indexed under `category` and drop the category.
    ///
    /// Returns how many entries were actually deleted.
    pub fn clear_category(&mut self, category: &str) -> usize {
        let Some(keys) = self.categories.remove(category) else {
            return 0;
        };
        let cleared = keys.iter().filter(|key| self.delete(key)).count();
        info!(
            agent_id = %self.agent_id,
            category = %category,
            cleared,
            "Cleared memory category"
        );
        cleared
    }

    /// Usage snapshot. Does not evict anything.
    pub fn get_stats(&self) -> MemoryStats {
        let now = Utc::now();
        let total = self.memories.len();
        let expired = self
            .memories
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .count();

        MemoryStats {
            agent_id: self.agent_id.clone(),
            total_memories: total,
            expired_memories: expired,
            active_memories: total - expired,
            max_entries: self.config.max_entries,
            usage_percentage: total as f64 / self.config.max_entries as f64 * 100.0,
            categories: self
                .categories
                .iter()
                .map(|(name, keys)| (name.clone(), keys.len()))
                .collect(),
        }
    }

    /// Snapshot every live entry, or only those under `category`.
    ///
    /// Category exports keep the index order; full exports are ordered by
    /// creation time.
    pub fn export_memories(&self, category: Option<&str>) -> Vec<MemoryRecord> {
        let now = Utc::now();
        let mut entries: Vec<&MemoryEntry> = match category {
            Some(category) => self
                .categories
                .get(category)
                .map(|keys| keys.iter().filter_map(|k| self.memories.get(k)).collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<&MemoryEntry> = self.memories.values().collect();
                all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
                all
            }
        };
        entries.retain(|entry| !entry.is_expired_at(now));
        entries.into_iter().map(MemoryEntry::to_record).collect()
    }

    /// Re-store exported records given as JSON. Malformed records are
    /// skipped and logged.
    ///
    /// Returns the number of records stored.
    pub fn import_memories(&mut self, records: &[Value]) -> usize {
        let parsed = records
            .iter()
            .enumerate()
            .map(|(index, record)| parse_record(index, record));
        self.import_parsed(records.len(), parsed)
    }

    /// Re-store records exactly as [`export_memories`](Self::export_memories)
    /// returned them.
    pub fn import_records(&mut self, records: &[MemoryRecord]) -> usize {
        let parsed = records
            .iter()
            .enumerate()
            .map(|(index, record)| record_parts(index, record));
        self.import_parsed(records.len(), parsed)
    }

    fn import_parsed(
        &mut self,
        total: usize,
        parsed: impl IntoIterator<Item = Result<(String, Value, StoreOptions), MemoryError>>,
    ) -> usize {
        let mut imported = 0;
        for record in parsed {
            let stored = record.and_then(|(key, value, options)| self.store(key, value, options));
            match stored {
                Ok(()) => imported += 1,
                Err(e) => {
                    warn!(agent_id = %self.agent_id, error = %e, "Skipping memory record");
                }
            }
        }

        info!(
            agent_id = %self.agent_id,
            imported,
            skipped = total - imported,
            "Imported memories"
        );
        imported
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .memories
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_memory(key);
        }

        if !expired.is_empty() {
            info!(
                agent_id = %self.agent_id,
                count = expired.len(),
                "Cleaned up expired memories"
            );
        }
        expired.len()
    }

    fn remove_memory(&mut self, key: &str) -> Option<MemoryEntry> {
        let removed = self.memories.remove(key);
        for keys in self.categories.values_mut() {
            keys.retain(|k| k != key);
        }
        removed
    }
}

fn record_parts(
    index: usize,
    record: &MemoryRecord,
) -> Result<(String, Value, StoreOptions), MemoryError> {
    let ttl = record
        .ttl
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| MemoryError::MalformedRecord {
            index,
            reason: format!("`ttl`: {e}"),
        })?;

    Ok((
        record.key.clone(),
        record.value.clone(),
        StoreOptions {
            category: record.category.clone(),
            metadata: Some(record.metadata.clone()),
            ttl,
        },
    ))
}

/// Text a value is matched against: strings as-is, everything else as compact JSON.
fn searchable_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_record(
    index: usize,
    record: &Value,
) -> Result<(String, Value, StoreOptions), MemoryError> {
    let malformed = |reason: &str| MemoryError::MalformedRecord {
        index,
        reason: reason.to_string(),
    };

    let fields = record
        .as_object()
        .ok_or_else(|| malformed("record is not an object"))?;

    let key = fields
        .get("key")
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| malformed("missing non-empty string field `key`"))?;

    let value = fields
        .get("value")
        .cloned()
        .ok_or_else(|| malformed("missing field `value`"))?;

    let metadata = match fields.get("metadata") {
        None | Some(Value::Null) => None,
        Some(Value::Object(metadata)) => Some(metadata.clone()),
        Some(_) => return Err(malformed("`metadata` must be an object")),
    };

    let ttl = match fields.get("ttl") {
        None | Some(Value::Null) => None,
        Some(ttl) => Some(
            ttl.as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| malformed("`ttl` must be a non-negative number of seconds"))?,
        ),
    };

    let category = match fields.get("category") {
        None | Some(Value::Null) => None,
        Some(Value::String(category)) => Some(category.clone()),
        Some(_) => return Err(malformed("`category` must be a string")),
    };

    Ok((
        key.to_string(),
        value,
        StoreOptions {
            category,
            metadata,
            ttl,
        },
    ))
}
