//! CLI command definitions for inferq.
//!
//! Two commands cover both sides of the relay:
//!
//! - `worker`: run a pool of workers against the configured Redis broker
//!   until interrupted
//! - `submit`: enqueue a single classification job and print the response
//!
//! The bundled classifier is a fixed-answer stand-in for smoke-testing the
//! relay; real deployments implement [`Classifier`](crate::Classifier) and
//! embed [`WorkerPool`](crate::WorkerPool) in their own binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::broker::RedisBroker;
use crate::compute::StaticClassifier;
use crate::config::Settings;
use crate::submitter::Submitter;
use crate::worker::WorkerPool;

/// Queue-mediated request/response relay for ML inference jobs.
#[derive(Parser)]
#[command(name = "inferq")]
#[command(about = "Redis-backed job relay for ML inference workloads")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a worker pool against the configured Redis broker.
    Worker(WorkerArgs),

    /// Enqueue one classification job and print the prediction as JSON.
    Submit(SubmitArgs),
}

/// Arguments for the `worker` command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of workers to run (overrides NUM_WORKERS).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Label the stand-in classifier answers with.
    #[arg(long, default_value = "unknown")]
    pub label: String,

    /// Score the stand-in classifier answers with.
    #[arg(long, default_value_t = 0.0)]
    pub score: f64,
}

/// Arguments for the `submit` command.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Identifier of the image to classify.
    pub image_name: String,

    /// Maximum seconds to wait for a result (overrides SUBMIT_TIMEOUT_SECS).
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Parse CLI arguments without running a command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Worker(args) => run_worker_command(settings, args).await,
        Commands::Submit(args) => run_submit_command(settings, args).await,
    }
}

async fn run_worker_command(settings: Settings, args: WorkerArgs) -> anyhow::Result<()> {
    let broker = Arc::new(RedisBroker::connect(&settings.redis_url()).await?);
    let classifier = Arc::new(StaticClassifier::new(args.label, args.score));

    let mut config = settings.worker_pool_config();
    if let Some(workers) = args.workers {
        config.num_workers = workers;
    }

    let mut pool = WorkerPool::new(config, broker, classifier);
    pool.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, draining workers");
    pool.shutdown().await?;

    let stats = pool.stats();
    info!(
        processed = stats.jobs_processed,
        failed = stats.jobs_failed,
        malformed = stats.malformed_entries,
        "Worker pool exited"
    );

    Ok(())
}

async fn run_submit_command(settings: Settings, args: SubmitArgs) -> anyhow::Result<()> {
    let broker = Arc::new(RedisBroker::connect(&settings.redis_url()).await?);

    let mut config = settings.submitter_config();
    if let Some(timeout) = args.timeout {
        config.max_wait = Duration::from_secs(timeout);
    }

    let submitter = Submitter::new(broker, config);

    match submitter.submit(&args.image_name).await {
        Ok(result) => {
            let response = serde_json::json!({
                "success": true,
                "prediction": result.prediction,
                "score": result.score,
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            let response = serde_json::json!({
                "success": false,
                "prediction": null,
                "score": null,
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_worker_command() {
        let cli = Cli::try_parse_from(["inferq", "worker", "--workers", "4", "--label", "tabby"])
            .expect("worker command should parse");

        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.workers, Some(4));
                assert_eq!(args.label, "tabby");
            }
            _ => panic!("expected worker command"),
        }
    }

    #[test]
    fn test_cli_parses_submit_command() {
        let cli = Cli::try_parse_from(["inferq", "submit", "cat.jpg", "--timeout", "10"])
            .expect("submit command should parse");

        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.image_name, "cat.jpg");
                assert_eq!(args.timeout, Some(10));
            }
            _ => panic!("expected submit command"),
        }
    }

    #[test]
    fn test_cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["inferq"]).is_err());
    }
}
