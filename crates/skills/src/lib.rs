//! Skills for SuperMean.
//!
//! A skill is a named async function that plan steps can invoke. The
//! [`SkillRegistry`] holds the available skills; tools synthesized at runtime
//! are registered into the same registry.

pub mod api_builder;
pub mod code_writer;
pub mod function;
pub mod registry;
pub mod summarize;

pub use api_builder::{API_BUILD_SKILL, ApiBuilderSkill};
pub use code_writer::{CODE_WRITE_SKILL, CodeWriterSkill};
pub use function::FnSkill;
pub use registry::{SkillMetrics, SkillRegistry};
pub use summarize::{SUMMARIZE_SKILL, SummarizeSkill};
