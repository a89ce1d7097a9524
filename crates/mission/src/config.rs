//! Mission configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is a valid
//! configuration.
//!
//! ```toml
//! [llm]
//! fallback_chain = ["gemini", "deepseek"]
//!
//! [[llm.connectors]]
//! name = "deepseek"
//! provider = "deepseek"
//! model = "deepseek-chat"
//!
//! [evaluator]
//! min_score = 0.7
//!
//! [tool_creator.limits]
//! max_wall_time_ms = 2000
//!
//! [mission]
//! max_planning_iterations = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use supermean_llm::ModelRouterConfig;
use supermean_sandbox::ResourceLimits;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionConfig {
    #[serde(default)]
    pub llm: ModelRouterConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub builder: BuilderConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub meta_planner: MetaPlannerConfig,

    #[serde(default)]
    pub tool_creator: ToolCreatorConfig,

    #[serde(default)]
    pub mission: MissionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_model")]
    pub preferred_model: String,

    /// Plans longer than this are truncated.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Persist each generated plan to the store under `plan_<goal>`.
    #[serde(default = "default_true")]
    pub store_plans: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            preferred_model: default_model(),
            max_steps: default_max_steps(),
            store_plans: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Extra attempts per step after the first one fails.
    #[serde(default = "default_max_step_retries")]
    pub max_step_retries: u32,

    #[serde(default)]
    pub retry_delay_ms: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_step_retries: default_max_step_retries(),
            retry_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_model")]
    pub preferred_model: String,

    /// Total LLM attempts when thresholds are missed or parsing fails.
    #[serde(default = "default_eval_retries")]
    pub max_retries: u32,

    /// Base delay; attempt `n` waits `retry_delay_ms * (n + 1)`.
    #[serde(default = "default_eval_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_min_score")]
    pub min_score: f64,

    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            preferred_model: default_model(),
            max_retries: default_eval_retries(),
            retry_delay_ms: default_eval_retry_delay(),
            min_score: default_min_score(),
            min_success_rate: default_min_success_rate(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaPlannerConfig {
    #[serde(default = "default_model")]
    pub preferred_model: String,
}

impl Default for MetaPlannerConfig {
    fn default() -> Self {
        Self {
            preferred_model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCreatorConfig {
    #[serde(default = "default_tool_model")]
    pub preferred_model: String,

    /// Minimum weighted quality score a generated tool must reach.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    #[serde(default)]
    pub skip_runtime_checks: bool,

    #[serde(default)]
    pub limits: ToolLimits,
}

impl Default for ToolCreatorConfig {
    fn default() -> Self {
        Self {
            preferred_model: default_tool_model(),
            quality_threshold: default_quality_threshold(),
            skip_runtime_checks: false,
            limits: ToolLimits::default(),
        }
    }
}

/// Per-call limits for generated tools: interpreter budgets plus the
/// string length caps checked on every input and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolLimits {
    #[serde(flatten)]
    pub resources: ResourceLimits,

    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,

    #[serde(default = "default_max_output_length")]
    pub max_output_length: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            resources: ResourceLimits::default(),
            max_input_length: default_max_input_length(),
            max_output_length: default_max_output_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionSettings {
    #[serde(default = "default_max_iterations")]
    pub max_planning_iterations: u32,

    /// Write mission state to the store after every iteration.
    #[serde(default = "default_true")]
    pub persist_state: bool,
}

impl Default for MissionSettings {
    fn default() -> Self {
        Self {
            max_planning_iterations: default_max_iterations(),
            persist_state: true,
        }
    }
}

fn default_model() -> String {
    "gemini".into()
}

fn default_tool_model() -> String {
    "deepseek".into()
}

fn default_true() -> bool {
    true
}

fn default_max_steps() -> usize {
    20
}

fn default_max_step_retries() -> u32 {
    2
}

fn default_eval_retries() -> u32 {
    3
}

fn default_eval_retry_delay() -> u64 {
    2000
}

fn default_min_score() -> f64 {
    0.6
}

fn default_min_success_rate() -> f64 {
    0.8
}

fn default_history_limit() -> usize {
    100
}

fn default_quality_threshold() -> f64 {
    0.5
}

fn default_max_input_length() -> usize {
    1000
}

fn default_max_output_length() -> usize {
    10_000
}

fn default_max_iterations() -> u32 {
    5
}

impl MissionConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix the file must be a regular file and must not be
    /// world-writable. Inline API keys are accepted with a warning.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;

        let inline_keys: Vec<&str> = config
            .llm
            .connectors
            .iter()
            .filter(|c| c.api_key.as_deref().is_some_and(|k| !k.is_empty()))
            .map(|c| c.name.as_str())
            .collect();
        if !inline_keys.is_empty() {
            warn!(
                connectors = ?inline_keys,
                "API keys found in config file '{}'. Prefer <NAME>_API_KEY environment variables.",
                path.display()
            );
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;
    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }
    Ok(())
}
