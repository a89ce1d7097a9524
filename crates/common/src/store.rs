//! The persistence capability used for mission state and plans.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result of a keyword search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: String,
    pub value: Value,
    pub metadata: Value,
    pub score: f64,
}

/// Key/value persistence. Last write wins; there is no locking across keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous entry.
    async fn store(&self, key: &str, value: Value, metadata: Value) -> Result<bool>;

    async fn retrieve(&self, key: &str) -> Result<Option<Value>>;

    /// Keyword search. `filter_metadata` must be a JSON object; every field in
    /// it has to match the entry's metadata exactly.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter_metadata: Option<&Value>,
    ) -> Result<Vec<SearchHit>>;

    /// Returns `false` when the key did not exist.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn keys(&self) -> Result<Vec<String>>;
}
