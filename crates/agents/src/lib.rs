//! Specialist agents for SuperMean.
//!
//! - **DevAgent**: code generation
//! - **ResearchAgent**: research and summarization
//! - **DesignAgent**: UI and product design
//! - **MedicalAgent**: general medical information
//! - **SecurityAgent**: security review
//!
//! Each specialist is a [`SpecialistAgent`] configured by an [`AgentProfile`]
//! and backed by the shared model router.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    AGENT POOL                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌────────┐ ┌──────┐ │
//! │  │   Dev   │  │Research │  │ Design  │  │Medical │ │ Sec  │ │
//! │  └────┬────┘  └────┬────┘  └────┬────┘  └───┬────┘ └──┬───┘ │
//! │       └────────────┴─────┬──────┴───────────┴─────────┘     │
//! │                          ▼                                  │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │        Model router (fallback chain)                 │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`AgentOrchestrator`] runs independent agent tasks in parallel for
//! callers outside the mission loop.

pub mod orchestrator;
pub mod specialist;

pub use orchestrator::{AgentOrchestrator, TaskAssignment, TaskOutcome, TaskOutcomeStatus};
pub use specialist::{AgentProfile, SpecialistAgent};
pub use supermean_common::{Agent, AgentCapability};
