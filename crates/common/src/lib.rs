//! Common types and traits shared across SuperMean crates.
//!
//! This crate provides the error taxonomy and the collaborator contracts
//! (agents, skills, persistence) that the mission loop is written against.

pub mod error;
pub mod skill;
pub mod store;
pub mod traits;

pub use error::{BoxError, InvalidStructure, Result, SuperMeanError};
pub use skill::{Skill, SkillExecutor, SkillMetadata};
pub use store::{KeyValueStore, SearchHit};
pub use traits::{Agent, AgentCapability, AgentConfig, agent_error_status};

/// Keyword arguments passed to agents and skills.
pub type ContextMap = serde_json::Map<String, serde_json::Value>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
