//! Key/value memory for SuperMean.
//!
//! Mission state and generated plans are persisted through the
//! [`KeyValueStore`](supermean_common::KeyValueStore) contract. This crate
//! provides the default implementation: an in-process map with keyword
//! search, capacity eviction and an optional JSON snapshot on disk.
//!
//! ```text
//! store(key, value, metadata) ──► ┌───────────────────────┐
//! retrieve(key)               ◄── │  in-memory records    │ ──► snapshot.json
//! search(query, k, filter)    ◄── │  (oldest evicted)     │     (optional)
//! delete(key)                 ──► └───────────────────────┘
//! ```

pub mod store;
pub mod types;

pub use store::MemoryStore;
pub use types::{MemoryConfig, MemoryRecord};
