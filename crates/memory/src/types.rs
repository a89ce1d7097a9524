//! Memory records and configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use supermean_common::now_millis;

/// One stored value with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,

    pub value: Value,

    /// Arbitrary JSON object used for filtering.
    #[serde(default)]
    pub metadata: Value,

    /// Creation timestamp (Unix millis)
    pub created_at: u64,

    /// Last write timestamp
    pub updated_at: u64,

    /// Number of reads (for diagnostics)
    #[serde(default)]
    pub access_count: u32,
}

impl MemoryRecord {
    pub fn new(key: impl Into<String>, value: Value, metadata: Value) -> Self {
        let now = now_millis();
        Self {
            key: key.into(),
            value,
            metadata,
            created_at: now,
            updated_at: now,
            access_count: 0,
        }
    }

    /// Lowercased text that keyword search matches against.
    pub(crate) fn haystack(&self) -> String {
        format!("{} {} {}", self.key, self.value, self.metadata).to_lowercase()
    }

    /// Whether every field of `filter` equals the same field in the metadata.
    pub(crate) fn matches_filter(&self, filter: Option<&Value>) -> bool {
        let Some(Value::Object(wanted)) = filter else {
            return true;
        };
        wanted
            .iter()
            .all(|(k, v)| self.metadata.get(k).is_some_and(|actual| actual == v))
    }
}

/// Configuration for the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// JSON snapshot mirrored on every write. `None` keeps everything in
    /// process memory only.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// Oldest entries are evicted past this many keys.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            max_entries: default_max_entries(),
        }
    }
}
