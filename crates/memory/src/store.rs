//! Key/value memory store with an optional JSON snapshot on disk.

use crate::types::{MemoryConfig, MemoryRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use supermean_common::{KeyValueStore, Result, SearchHit, SuperMeanError, now_millis};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Entries {
    records: HashMap<String, MemoryRecord>,
    /// Keys in write order, oldest first.
    order: VecDeque<String>,
}

impl Entries {
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) -> Option<MemoryRecord> {
        self.order.retain(|k| k != key);
        self.records.remove(key)
    }
}

/// The main memory store.
///
/// All reads are served from memory. When a snapshot path is configured the
/// whole store is rewritten to it after every mutation and reloaded on open.
#[derive(Clone)]
pub struct MemoryStore {
    config: MemoryConfig,
    entries: Arc<RwLock<Entries>>,
}

impl MemoryStore {
    /// Create a store, loading the snapshot if one exists.
    pub async fn new(config: MemoryConfig) -> Result<Self> {
        let mut entries = Entries::default();

        if let Some(path) = &config.snapshot_path {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => {
                    let mut records: Vec<MemoryRecord> = serde_json::from_str(&text)?;
                    records.sort_by_key(|r| r.updated_at);
                    for record in records {
                        entries.order.push_back(record.key.clone());
                        entries.records.insert(record.key.clone(), record);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            info!(
                snapshot = %path.display(),
                entries = entries.records.len(),
                "Loaded memory snapshot"
            );
        }

        Ok(Self {
            config,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// An in-process store with default limits.
    pub fn in_memory() -> Self {
        Self {
            config: MemoryConfig::default(),
            entries: Arc::new(RwLock::new(Entries::default())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Full record, including metadata and timestamps.
    pub async fn get_record(&self, key: &str) -> Option<MemoryRecord> {
        self.entries.read().await.records.get(key).cloned()
    }

    async fn write_snapshot(&self, entries: &Entries) -> Result<()> {
        let Some(path) = &self.config.snapshot_path else {
            return Ok(());
        };
        let records: Vec<&MemoryRecord> = entries
            .order
            .iter()
            .filter_map(|k| entries.records.get(k))
            .collect();
        let json = serde_json::to_string_pretty(&records)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(snapshot = %path.display(), entries = records.len(), "Wrote memory snapshot");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn store(&self, key: &str, value: Value, metadata: Value) -> Result<bool> {
        if key.is_empty() {
            return Err(SuperMeanError::Memory("Cannot store under an empty key".into()));
        }
        debug!(key = %key, "Storing memory");

        let mut entries = self.entries.write().await;
        let record = entries
            .records
            .entry(key.to_string())
            .or_insert_with(|| MemoryRecord::new(key, Value::Null, Value::Null));
        record.value = value;
        record.metadata = metadata;
        record.updated_at = now_millis();
        entries.touch(key);

        while entries.records.len() > self.config.max_entries {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.records.remove(&oldest);
            debug!(key = %oldest, "Evicted memory entry");
        }

        self.write_snapshot(&entries).await?;
        Ok(true)
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.write().await;
        Ok(entries.records.get_mut(key).map(|record| {
            record.access_count = record.access_count.saturating_add(1);
            record.value.clone()
        }))
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter_metadata: Option<&Value>,
    ) -> Result<Vec<SearchHit>> {
        if filter_metadata.is_some_and(|f| !f.is_object()) {
            warn!("Ignoring non-object metadata filter");
        }
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

        let entries = self.entries.read().await;
        let mut scored: Vec<(f64, &MemoryRecord)> = entries
            .records
            .values()
            .filter(|r| r.matches_filter(filter_metadata))
            .filter_map(|r| {
                if terms.is_empty() {
                    return Some((1.0, r));
                }
                let hay = r.haystack();
                let hits = terms.iter().filter(|t| hay.contains(t.as_str())).count();
                (hits > 0).then(|| (hits as f64 / terms.len() as f64, r))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.updated_at.cmp(&a.1.updated_at))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, r)| SearchHit {
                key: r.key.clone(),
                value: r.value.clone(),
                metadata: r.metadata.clone(),
                score,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let existed = entries.remove(key).is_some();
        if existed {
            self.write_snapshot(&entries).await?;
        }
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.order.iter().cloned().collect())
    }
}
