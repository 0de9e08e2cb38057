mod config;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use treadle_core::{App, AppBuilder, StatsSnapshot, TaskView};

use crate::config::{CliArgs, Command, GenerateArgs, RunConfig};

/// One line of `generate` output.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputLine<'a> {
    Update { prompt_index: usize, view: &'a TaskView },
    Rejected { prompt_index: usize, error: String },
    Stats { stats: &'a StatsSnapshot },
}

fn print_line(line: &OutputLine<'_>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    let run = RunConfig::try_from(args.orchestrator)?;

    let app = AppBuilder::new()
        .config(run.orchestrator)
        .backend_config(&run.backend)
        .context("backend setup")?
        .build()
        .context("orchestrator setup")?;
    let running = app.start();

    let outcome = match args.command {
        Command::Generate(generate) => {
            tokio::select! {
                outcome = generate_all(&app, &generate) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("interrupted, shutting down");
                    Ok(())
                }
            }
            .map(|()| generate.stats)
        }
    };

    running.shutdown().await;

    if outcome? {
        let stats = app.stats().await.context("reading queue depth")?;
        print_line(&OutputLine::Stats { stats: &stats })?;
    }
    Ok(())
}

/// Long enough for the last of `tasks` tasks queued behind every other one.
fn wait_budget(task_time_limit: Duration, tasks: usize) -> Duration {
    let rounds = u32::try_from(tasks).unwrap_or(u32::MAX).saturating_add(1);
    task_time_limit
        .saturating_mul(rounds)
        .saturating_add(Duration::from_secs(5))
}

async fn generate_all(app: &App, args: &GenerateArgs) -> anyhow::Result<()> {
    let params = args.params();
    let caller_id = args.caller_id.as_deref();

    let mut accepted = Vec::with_capacity(args.prompts.len());
    for (prompt_index, prompt) in args.prompts.iter().enumerate() {
        match app.gateway.submit(caller_id, prompt, params).await {
            Ok(receipt) => {
                tracing::debug!(prompt_index, task_id = %receipt.task_id, "submitted");
                accepted.push((prompt_index, receipt.task_id));
            }
            Err(err) => print_line(&OutputLine::Rejected {
                prompt_index,
                error: err.to_string(),
            })?,
        }
    }

    let wait_timeout = wait_budget(app.config().task_time_limit, accepted.len());

    for (prompt_index, task_id) in accepted {
        if args.stream {
            let mut updates = app.reader.stream(task_id);
            while let Some(item) = updates.next().await {
                let view = item.with_context(|| format!("streaming {task_id}"))?;
                print_line(&OutputLine::Update {
                    prompt_index,
                    view: &view,
                })?;
            }
        } else {
            let view = app
                .reader
                .wait_for_terminal(task_id, args.poll_interval(), wait_timeout)
                .await
                .with_context(|| format!("waiting for {task_id}"))?;
            print_line(&OutputLine::Update {
                prompt_index,
                view: &view,
            })?;
        }
    }
    Ok(())
}
