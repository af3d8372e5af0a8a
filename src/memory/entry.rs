//! Memory entries and their exported form.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single stored value with access statistics and an optional TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub metadata: Map<String, Value>,
    /// Category the key is indexed under, if any.
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
    /// Lifetime measured from `created_at`.
    pub ttl: Option<Duration>,
}

impl MemoryEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(
        key: impl Into<String>,
        value: Value,
        metadata: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            metadata,
            category: None,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl,
        }
    }

    /// Instant after which the entry is expired. `None` if it never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl?).ok()?;
        self.created_at.checked_add_signed(ttl)
    }

    /// Whether the TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| now > deadline)
    }

    /// Read the value, recording the access.
    pub fn access(&mut self) -> &Value {
        self.accessed_at = Utc::now();
        self.access_count += 1;
        &self.value
    }

    /// Export with every field plus the computed `expired` flag.
    pub fn to_record(&self) -> MemoryRecord {
        MemoryRecord {
            key: self.key.clone(),
            value: self.value.clone(),
            metadata: self.metadata.clone(),
            category: self.category.clone(),
            created_at: self.created_at,
            accessed_at: self.accessed_at,
            access_count: self.access_count,
            ttl: self.ttl.map(|ttl| ttl.as_secs_f64()),
            expired: self.is_expired(),
        }
    }
}

/// Serializable snapshot of a [`MemoryEntry`], as produced by export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
    /// TTL in seconds.
    pub ttl: Option<f64>,
    pub expired: bool,
}
