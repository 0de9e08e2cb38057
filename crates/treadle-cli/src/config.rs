use std::time::Duration;

use anyhow::bail;
use clap::{Args, Parser, Subcommand, ValueEnum};
use treadle_core::app::RateLimitConfig;
use treadle_core::{BackendConfig, GenerationParams, OrchestratorConfig};

/// Command-line driver for the treadle orchestrator.
///
/// Every orchestrator setting can also come from the environment (or a
/// `.env` file in the working directory).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "treadle",
    version,
    about = "Queue text-generation jobs and collect their results"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub orchestrator: OrchestratorArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Submit prompts, wait for each to finish and print the results as JSON.
    Generate(GenerateArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Echo,
    Ollama,
}

#[derive(Args, Debug, Clone)]
pub struct OrchestratorArgs {
    /// Hard deadline for one generation, in seconds.
    ///
    /// Environment variable: `TASK_TIME_LIMIT`
    #[arg(long, env = "TASK_TIME_LIMIT", default_value_t = 120, global = true)]
    pub task_time_limit: u64,

    /// How long finished results stay readable, in seconds.
    ///
    /// Environment variable: `RESULT_TTL`
    #[arg(long, env = "RESULT_TTL", default_value_t = 3600, global = true)]
    pub result_ttl: u64,

    /// Number of workers sharing the backend.
    ///
    /// Environment variable: `WORKER_COUNT`
    #[arg(long, env = "WORKER_COUNT", default_value_t = 1, global = true)]
    pub worker_count: usize,

    /// Server-side tick of `--stream`, in milliseconds.
    ///
    /// Environment variable: `STREAM_INTERVAL_MS`
    #[arg(long, env = "STREAM_INTERVAL_MS", default_value_t = 500, global = true)]
    pub stream_interval_ms: u64,

    /// Sustained submissions per minute, per caller.
    ///
    /// Environment variable: `RATE_LIMIT_PER_MINUTE`
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = 60, global = true)]
    pub rate_limit_per_minute: u32,

    /// Burst capacity of each caller's bucket.
    ///
    /// Environment variable: `RATE_LIMIT_BURST`
    #[arg(long, env = "RATE_LIMIT_BURST", default_value_t = 10, global = true)]
    pub rate_limit_burst: u32,

    /// Generation backend.
    ///
    /// Environment variable: `BACKEND`
    #[arg(long, env = "BACKEND", value_enum, default_value_t = BackendKind::Echo, global = true)]
    pub backend: BackendKind,

    /// Artificial latency of the echo backend, in milliseconds.
    ///
    /// Environment variable: `ECHO_LATENCY_MS`
    #[arg(long, env = "ECHO_LATENCY_MS", default_value_t = 0, global = true)]
    pub echo_latency_ms: u64,

    /// Environment variable: `OLLAMA_BASE_URL`
    #[arg(long, env = "OLLAMA_BASE_URL", default_value_t = String::from("http://localhost:11434"), global = true)]
    pub ollama_base_url: String,

    /// Environment variable: `OLLAMA_MODEL`
    #[arg(long, env = "OLLAMA_MODEL", default_value_t = String::from("llama3.2"), global = true)]
    pub ollama_model: String,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// One or more prompts; each becomes its own task.
    #[arg(required = true, num_args = 1..)]
    pub prompts: Vec<String>,

    #[arg(long, default_value_t = 512)]
    pub max_tokens: u32,

    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,

    #[arg(long, default_value_t = 0.9)]
    pub top_p: f32,

    /// Rate-limit identity; defaults to "anonymous".
    #[arg(long, env = "CALLER_ID")]
    pub caller_id: Option<String>,

    /// Print every status change instead of only the final result.
    #[arg(long, default_value_t = false)]
    pub stream: bool,

    /// Client poll interval when not streaming, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Print queue and task counters when done.
    #[arg(long, default_value_t = false)]
    pub stats: bool,
}

impl GenerateArgs {
    pub fn params(&self) -> GenerationParams {
        GenerationParams::default()
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_top_p(self.top_p)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub orchestrator: OrchestratorConfig,
    pub backend: BackendConfig,
}

impl TryFrom<OrchestratorArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: OrchestratorArgs) -> Result<Self, Self::Error> {
        if args.task_time_limit == 0 {
            bail!("TASK_TIME_LIMIT must be greater than 0");
        }
        if args.worker_count == 0 {
            bail!("WORKER_COUNT must be greater than 0");
        }

        let task_time_limit = Duration::from_secs(args.task_time_limit);
        let orchestrator = OrchestratorConfig {
            task_time_limit,
            result_ttl: Duration::from_secs(args.result_ttl),
            worker_count: args.worker_count,
            stream_interval: Duration::from_millis(args.stream_interval_ms),
            rate_limit: RateLimitConfig {
                per_minute: args.rate_limit_per_minute,
                burst: args.rate_limit_burst,
            },
            ..OrchestratorConfig::default()
        };

        let backend = match args.backend {
            BackendKind::Echo => BackendConfig::Echo {
                latency: Duration::from_millis(args.echo_latency_ms),
            },
            BackendKind::Ollama => BackendConfig::Ollama {
                base_url: args.ollama_base_url,
                model: args.ollama_model,
                request_timeout: task_time_limit,
            },
        };

        Ok(Self {
            orchestrator,
            backend,
        })
    }
}
