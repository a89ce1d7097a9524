//! SuperMean command-line runner.
//!
//! Usage:
//!   supermean run --goal "Summarize the Rust 2024 edition changes"
//!   supermean run --goal "..." --config supermean.toml --context '{"topic": "rust"}'
//!   supermean status <MISSION_ID> --state-dir .supermean
//!   supermean list --state-dir .supermean
//!
//! # Environment Variables
//!
//! - `SUPERMEAN_CONFIG` - mission config file (same as `--config`)
//! - `SUPERMEAN_STATE_DIR` - where mission state is kept (default: `.supermean`)
//! - `<CONNECTOR>_API_KEY` - API key for a connector without an inline key
//! - `RUST_LOG` - log filter (default: `info,supermean_mission=debug`)

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use supermean_agents::SpecialistAgent;
use supermean_common::{ContextMap, KeyValueStore};
use supermean_llm::{ModelRouter, TextGenerator};
use supermean_memory::{MemoryConfig, MemoryStore};
use supermean_mission::{MissionConfig, MissionControl, MissionStatus};
use supermean_skills::{
    API_BUILD_SKILL, ApiBuilderSkill, CODE_WRITE_SKILL, CodeWriterSkill, SUMMARIZE_SKILL,
    SkillRegistry, SummarizeSkill,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "supermean", version, about = "Run autonomous plan-build-evaluate missions")]
struct Cli {
    /// Mission configuration (TOML). Defaults apply when omitted.
    #[arg(long, short, global = true, env = "SUPERMEAN_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the mission state snapshot.
    #[arg(long, global = true, env = "SUPERMEAN_STATE_DIR", default_value = ".supermean")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a mission and print its final state as JSON.
    Run {
        #[arg(long, short)]
        goal: String,

        /// Initial context as a JSON object.
        #[arg(long)]
        context: Option<String>,

        /// Reuse a specific mission id.
        #[arg(long)]
        mission_id: Option<String>,
    },
    /// Print the status report of a stored mission.
    Status { mission_id: String },
    /// List stored mission ids.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,supermean_mission=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => MissionConfig::from_file(path)?,
        None => MissionConfig::default(),
    };
    let control = build_mission_control(&config, &cli.state_dir).await?;

    match cli.command {
        Command::Run {
            goal,
            context,
            mission_id,
        } => {
            let context = parse_context(context.as_deref())?;
            let state = control.start_mission(&goal, context, mission_id).await;
            println!("{}", serde_json::to_string_pretty(&state)?);
            info!(mission_id = %state.mission_id, status = ?state.status, "Mission finished");
            Ok(if state.status == MissionStatus::FinalSuccess {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Status { mission_id } => {
            let report = control.get_mission_status(&mission_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            for id in control.list_missions().await? {
                println!("{id}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn build_mission_control(
    config: &MissionConfig,
    state_dir: &Path,
) -> anyhow::Result<MissionControl> {
    let router: Arc<dyn TextGenerator> = Arc::new(ModelRouter::from_config(&config.llm));

    let store = MemoryStore::new(MemoryConfig {
        snapshot_path: Some(state_dir.join("missions.json")),
        ..Default::default()
    })
    .await
    .with_context(|| format!("Failed to open mission store in {}", state_dir.display()))?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);

    let registry = Arc::new(SkillRegistry::new());
    registry.register(
        SUMMARIZE_SKILL,
        Arc::new(SummarizeSkill::new(router.clone())),
        SummarizeSkill::metadata(),
    )?;
    registry.register(
        CODE_WRITE_SKILL,
        Arc::new(CodeWriterSkill::new(router.clone())),
        CodeWriterSkill::metadata(),
    )?;
    registry.register(
        API_BUILD_SKILL,
        Arc::new(ApiBuilderSkill::new(router.clone())),
        ApiBuilderSkill::metadata(),
    )?;

    let agents = SpecialistAgent::all_defaults(router.clone());
    Ok(MissionControl::from_config(
        config,
        router,
        registry,
        agents,
        Some(store),
    ))
}

fn parse_context(raw: Option<&str>) -> anyhow::Result<ContextMap> {
    let Some(raw) = raw else {
        return Ok(ContextMap::new());
    };
    match serde_json::from_str::<Value>(raw).context("--context is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--context must be a JSON object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context() {
        assert!(parse_context(None).unwrap().is_empty());
        let ctx = parse_context(Some(r#"{"topic": "rust", "depth": 2}"#)).unwrap();
        assert_eq!(ctx["topic"], "rust");
        assert_eq!(ctx["depth"], 2);
        assert!(parse_context(Some("[1, 2]")).is_err());
        assert!(parse_context(Some("{oops")).is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "supermean",
            "run",
            "--goal",
            "Write a haiku",
            "--state-dir",
            "/tmp/sm",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, PathBuf::from("/tmp/sm"));
        assert!(matches!(cli.command, Command::Run { ref goal, .. } if goal == "Write a haiku"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_mission() {
        let dir = tempfile::tempdir().unwrap();
        let control = build_mission_control(&MissionConfig::default(), dir.path())
            .await
            .unwrap();
        assert!(control.get_mission_status("missing").await.is_err());
        assert!(control.list_missions().await.unwrap().is_empty());
    }
}
