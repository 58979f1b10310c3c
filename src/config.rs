//! Command-line configuration for the agent binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::agent::AgentConfig;
use crate::brain::Provider;
use crate::extract::ExtractionProfile;
use crate::hands::WorkerSpec;
use crate::types::{DEFAULT_WANTED_RECORDS, MAX_STEPS_PER_TASK};

/// Drive a browser toward a goal, one LLM-chosen action at a time.
///
/// Credentials come from the environment (or a `.env` file):
/// GEMINI_API_KEY / GEMINI_MODEL or OPENAI_API_KEY / OPENAI_MODEL.
#[derive(Debug, Parser)]
#[command(name = "agent", version)]
pub struct AgentArgs {
    /// The task. Asked for interactively when omitted.
    pub task: Option<String>,

    /// Which hosted model answers the decisions.
    #[arg(long, value_enum, default_value_t = Provider::Gemini)]
    pub provider: Provider,

    /// Model name; overrides the provider's *_MODEL variable.
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = MAX_STEPS_PER_TASK)]
    pub max_steps: usize,

    /// Listings to collect before stopping on its own (0 disables).
    #[arg(long, default_value_t = DEFAULT_WANTED_RECORDS)]
    pub want: usize,

    /// Pause after each successful tool call, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub step_delay_ms: u64,

    /// Worker executable. Defaults to the `worker` binary next to this one.
    #[arg(long)]
    pub worker: Option<String>,

    /// Extra argument for the worker (repeatable), e.g. `--worker-arg worker.py`.
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Working directory for the worker process.
    #[arg(long)]
    pub worker_dir: Option<PathBuf>,

    /// How long to wait for the worker's greeting, in seconds.
    #[arg(long, default_value_t = 60)]
    pub worker_startup_secs: u64,

    /// JSON file with the extraction vocabulary and results trigger.
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Page to try once when a search reports no results.
    #[arg(long)]
    pub fallback_url: Option<String>,
}

impl AgentArgs {
    pub fn agent_config(&self) -> Result<AgentConfig> {
        let mut profile = match &self.profile {
            Some(path) => load_profile(path)?,
            None => ExtractionProfile::default(),
        };
        if let Some(url) = &self.fallback_url {
            profile.trigger.fallback_url = Some(url.clone());
        }

        Ok(AgentConfig {
            max_steps: self.max_steps,
            want_records: self.want,
            step_delay: Duration::from_millis(self.step_delay_ms),
            profile,
            ..AgentConfig::default()
        })
    }

    pub fn worker_spec(&self) -> Result<WorkerSpec> {
        let program = match &self.worker {
            Some(program) => program.clone(),
            None => default_worker_path()?,
        };

        Ok(WorkerSpec {
            program,
            args: self.worker_args.clone(),
            current_dir: self.worker_dir.clone(),
            startup_timeout: Duration::from_secs(self.worker_startup_secs),
        })
    }
}

fn default_worker_path() -> Result<String> {
    let exe = std::env::current_exe().context("cannot locate the agent executable")?;
    let worker = exe.with_file_name(format!("worker{}", std::env::consts::EXE_SUFFIX));
    Ok(worker.to_string_lossy().into_owned())
}

pub fn load_profile(path: &Path) -> Result<ExtractionProfile> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open profile {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    serde_json::from_reader(reader).with_context(|| format!("invalid profile {}", path.display()))
}
