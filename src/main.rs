use std::path::PathBuf;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use task_log_tee::common::models::TaskAttempt;
use task_log_tee::{run_task_attempt, LoggingRuntime};

/// Task log tee handler and logging configuration tool
#[derive(Parser)]
#[command(name = "task-log-tee", version, about)]
struct Cli {
    /// Settings file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the assembled logging configuration as JSON
    Config,
    /// Run a task attempt under the tee task handler
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    dag_id: String,

    #[arg(long)]
    task_id: String,

    #[arg(long, default_value_t = 1)]
    try_number: u32,

    /// RFC 3339 timestamp; defaults to now
    #[arg(long)]
    execution_date: Option<DateTime<Utc>>,

    /// Raw attempt: no end-of-log tee at close
    #[arg(long)]
    raw: bool,

    /// Messages to log on the task target
    #[arg(required = true)]
    messages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Config => {
            let config = LoggingRuntime::load_config(cli.config.as_deref())?;
            println!("{}", config.to_json()?);
        }
        Command::Run(args) => {
            let runtime = LoggingRuntime::init(cli.config.as_deref())?;
            let handler = runtime.task_handler()?.clone();
            let attempt = TaskAttempt::new(
                args.dag_id,
                args.task_id,
                args.execution_date.unwrap_or_else(Utc::now),
                args.try_number,
            )
            .with_raw(args.raw);

            let worker = {
                let handler = handler.clone();
                tokio::task::spawn_blocking(move || run_task_attempt(&handler, &attempt, &args.messages))
            };

            tokio::select! {
                result = worker => result.context("task attempt panicked")??,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, closing task log");
                    handler.close();
                }
            }
        }
    }

    Ok(())
}
