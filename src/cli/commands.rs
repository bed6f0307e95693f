//! CLI command definitions for dropq-fanout.
//!
//! `run` performs a whole request in one go. `dispatch`, `poll` and `collect`
//! split it into separate invocations connected by a job-set file, so an
//! external scheduler can own the polling cadence.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::HttpWorkerClient;
use crate::config::{
    FanoutConfig, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_NUM_BUDGET_YEARS,
    DEFAULT_START_YEAR, NUM_BUDGET_YEARS_ENV, START_YEAR_ENV, WORKERS_ENV,
};
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    CompletionPoller, FanoutCoordinator, JobSet, MergedResult, PayloadTemplate, ResultCollector,
    WorkerPool,
};

/// Exit code of `poll` when at least one job is still running.
pub const EXIT_PENDING: u8 = 2;

/// Fan out dropq tax-calculation requests across a worker pool.
#[derive(Parser)]
#[command(name = "dropq-fanout")]
#[command(about = "Fan out dropq tax-calculation requests across a worker pool")]
#[command(version)]
#[command(
    long_about = "dropq-fanout splits a request into one job per budget year, submits the jobs round-robin to dropq workers with failover, waits for them and merges their results.\n\nExample usage:\n  dropq-fanout run --workers 10.0.0.1:5050,10.0.0.2:5050 --user-mods reform.json --output result.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Print Prometheus metrics to stderr when the command finishes.
    #[arg(long, global = true)]
    pub metrics: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Dispatch, wait for and collect one request.
    Run(RunArgs),

    /// Submit all jobs of a request and write the job set to a file.
    Dispatch(DispatchArgs),

    /// Run one completion pass over a job set. Exits 2 while jobs are pending.
    Poll(PollArgs),

    /// Fetch and merge the results of a completed job set.
    Collect(CollectArgs),
}

/// Per-call settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TransportArgs {
    /// Timeout of a single worker call, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub timeout_ms: u64,

    /// Maximum concurrent status or result calls.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
}

/// What to submit and where.
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Comma-separated worker addresses (host:port or URL).
    #[arg(short = 'w', long, env = WORKERS_ENV)]
    pub workers: String,

    /// Number of budget years; one job is submitted per year.
    #[arg(long, env = NUM_BUDGET_YEARS_ENV, default_value_t = DEFAULT_NUM_BUDGET_YEARS)]
    pub horizon: u32,

    /// First budget year, used to key user modifications.
    #[arg(long, env = START_YEAR_ENV, default_value_t = DEFAULT_START_YEAR)]
    pub start_year: i32,

    /// JSON or YAML object whose fields are sent with every job.
    #[arg(long, conflicts_with = "user_mods")]
    pub template: Option<PathBuf>,

    /// JSON or YAML reform, sent as `user_mods` keyed by the start year.
    #[arg(long)]
    pub user_mods: Option<PathBuf>,

    /// Failed submissions tolerated per job before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Pause after a failed submission, in milliseconds.
    #[arg(long, default_value = "0")]
    pub retry_backoff_ms: u64,
}

/// Arguments for `dropq-fanout run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// Pause between completion passes, in milliseconds.
    #[arg(long, default_value = "5000")]
    pub poll_interval_ms: u64,

    /// Give up if the request has not finished after this many seconds.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Write the merged result here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `dropq-fanout dispatch`.
#[derive(Parser, Debug)]
pub struct DispatchArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// File the job set is written to.
    #[arg(short = 'j', long)]
    pub job_set: PathBuf,
}

/// Arguments for `dropq-fanout poll`.
#[derive(Parser, Debug)]
pub struct PollArgs {
    /// Job set written by `dispatch`.
    #[arg(short = 'j', long)]
    pub job_set: PathBuf,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// Output JSON summary.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `dropq-fanout collect`.
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Job set written by `dispatch`.
    #[arg(short = 'j', long)]
    pub job_set: PathBuf,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// Write the merged result here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct PollOutput {
    request_id: String,
    jobs: usize,
    completed: usize,
    pending: usize,
    all_complete: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the command.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    if cli.metrics {
        init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;
    }

    let code = match cli.command {
        Commands::Run(args) => run_run_command(args).await?,
        Commands::Dispatch(args) => run_dispatch_command(args).await?,
        Commands::Poll(args) => run_poll_command(args).await?,
        Commands::Collect(args) => run_collect_command(args).await?,
    };

    if cli.metrics {
        eprintln!("{}", export_metrics());
    }
    Ok(code)
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_run_command(args: RunArgs) -> anyhow::Result<ExitCode> {
    let mut config = fanout_config(&args.request, &args.transport)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms));
    if let Some(secs) = args.deadline_secs {
        config = config.with_deadline(Duration::from_secs(secs));
    }

    let template = load_template(&args.request)?;
    let coordinator = coordinator(&args.request, config)?;

    // The local sender keeps the channel open if the signal listener exits early.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling request");
            let _ = signal_tx.send(());
        }
    });

    let merged = coordinator
        .run_until(args.request.horizon, &template, shutdown_rx)
        .await?;

    drop(shutdown_tx);

    write_result(&merged, args.output.as_deref())?;
    Ok(ExitCode::SUCCESS)
}

async fn run_dispatch_command(args: DispatchArgs) -> anyhow::Result<ExitCode> {
    let config = fanout_config(&args.request, &args.transport);
    let template = load_template(&args.request)?;
    let coordinator = coordinator(&args.request, config)?;

    let job_set = coordinator.dispatch(args.request.horizon, &template).await?;
    save_job_set(&job_set, &args.job_set)?;

    info!(
        request_id = %job_set.request_id,
        jobs = job_set.len(),
        path = %args.job_set.display(),
        "Wrote job set"
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_poll_command(args: PollArgs) -> anyhow::Result<ExitCode> {
    let job_set = load_job_set(&args.job_set)?;
    let config = transport_config(&args.transport);
    config.validate()?;
    let client = HttpWorkerClient::new(config.request_timeout)?;
    let poller = CompletionPoller::new(Arc::new(client), &config);

    let report = poller.poll_report(&job_set.jobs).await;
    let output = PollOutput {
        request_id: job_set.request_id.to_string(),
        jobs: job_set.len(),
        completed: report.completed_count(),
        pending: report.pending_count(),
        all_complete: report.all_complete(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "{}/{} jobs complete ({} pending)",
            output.completed, output.jobs, output.pending
        );
    }

    if output.all_complete {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PENDING))
    }
}

async fn run_collect_command(args: CollectArgs) -> anyhow::Result<ExitCode> {
    let job_set = load_job_set(&args.job_set)?;
    let config = transport_config(&args.transport);
    config.validate()?;
    let client = HttpWorkerClient::new(config.request_timeout)?;
    let collector = ResultCollector::new(Arc::new(client), &config);

    let merged = collector.collect(&job_set.jobs).await?;
    write_result(&merged, args.output.as_deref())?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helpers
// ============================================================================

fn transport_config(transport: &TransportArgs) -> FanoutConfig {
    FanoutConfig::default()
        .with_request_timeout(Duration::from_millis(transport.timeout_ms))
        .with_concurrency(transport.concurrency)
}

fn fanout_config(request: &RequestArgs, transport: &TransportArgs) -> FanoutConfig {
    transport_config(transport)
        .with_max_attempts(request.max_attempts)
        .with_retry_backoff(Duration::from_millis(request.retry_backoff_ms))
}

fn coordinator(request: &RequestArgs, config: FanoutConfig) -> anyhow::Result<FanoutCoordinator> {
    let pool = WorkerPool::from_list(&request.workers)?;
    info!(workers = pool.len(), horizon = request.horizon, "Using worker pool");
    Ok(FanoutCoordinator::with_http(pool.addresses().to_vec(), config)?)
}

/// Builds the payload template from `--template` or `--user-mods`.
fn load_template(request: &RequestArgs) -> anyhow::Result<PayloadTemplate> {
    if let Some(path) = &request.template {
        return Ok(PayloadTemplate::from_json(read_structured(path)?)?);
    }
    if let Some(path) = &request.user_mods {
        return Ok(PayloadTemplate::from_user_mods(
            request.start_year,
            read_structured(path)?,
        )?);
    }
    Ok(PayloadTemplate::new())
}

/// Reads a JSON file, or YAML when the extension says so.
fn read_structured(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid YAML in {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid JSON in {}: {}", path.display(), e))
    }
}

fn save_job_set(job_set: &JobSet, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(job_set)
        .map_err(|e| anyhow::anyhow!("Failed to serialize job set: {}", e))?;
    fs::write(path, json)
        .map_err(|e| anyhow::anyhow!("Failed to write job set to {}: {}", path.display(), e))
}

fn load_job_set(path: &Path) -> anyhow::Result<JobSet> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read job set {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid job set {}: {}", path.display(), e))
}

fn write_result(merged: &MergedResult, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&merged.to_wire())
        .map_err(|e| anyhow::anyhow!("Failed to serialize merged result: {}", e))?;

    match output {
        Some(path) => {
            fs::write(path, json).map_err(|e| {
                anyhow::anyhow!("Failed to write result to {}: {}", path.display(), e)
            })?;
            info!(path = %path.display(), years = merged.num_years(), "Wrote merged result");
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{AcceptedJob, WorkerAddress};
    use clap::CommandFactory;
    use uuid::Uuid;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let args = vec!["dropq-fanout", "run", "--workers", "a:1,b:2"];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert_eq!(cli.log_level, "info");
        assert!(!cli.metrics);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.request.workers, "a:1,b:2");
                assert_eq!(args.request.max_attempts, DEFAULT_MAX_ATTEMPTS);
                assert_eq!(args.transport.timeout_ms, 1000);
                assert_eq!(args.transport.concurrency, DEFAULT_CONCURRENCY);
                assert_eq!(args.poll_interval_ms, 5000);
                assert!(args.deadline_secs.is_none());
                assert!(args.output.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_options() {
        let args = vec![
            "dropq-fanout",
            "run",
            "-w",
            "a:1",
            "--horizon",
            "3",
            "--start-year",
            "2020",
            "--max-attempts",
            "5",
            "--timeout-ms",
            "250",
            "--deadline-secs",
            "60",
            "-o",
            "out.json",
            "--metrics",
            "-l",
            "debug",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert!(cli.metrics);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.request.horizon, 3);
                assert_eq!(args.request.start_year, 2020);
                assert_eq!(args.deadline_secs, Some(60));
                assert_eq!(args.output, Some(PathBuf::from("out.json")));

                let config = fanout_config(&args.request, &args.transport);
                assert_eq!(config.max_attempts, 5);
                assert_eq!(config.request_timeout, Duration::from_millis(250));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_template_conflicts_with_user_mods() {
        let args = vec![
            "dropq-fanout",
            "dispatch",
            "-w",
            "a:1",
            "-j",
            "jobs.json",
            "--template",
            "t.json",
            "--user-mods",
            "m.json",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_poll_command_parses() {
        let args = vec!["dropq-fanout", "poll", "-j", "jobs.json", "--json"];
        let cli = Cli::try_parse_from(args).expect("should parse");
        match cli.command {
            Commands::Poll(args) => {
                assert_eq!(args.job_set, PathBuf::from("jobs.json"));
                assert!(args.json);
            }
            _ => panic!("Expected Poll command"),
        }
    }

    fn request_args(template: Option<PathBuf>, user_mods: Option<PathBuf>) -> RequestArgs {
        RequestArgs {
            workers: "a:1".to_string(),
            horizon: 2,
            start_year: 2017,
            template,
            user_mods,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: 0,
        }
    }

    #[test]
    fn test_load_template_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("template.json");
        fs::write(&path, r#"{"first_year": 2017, "label": "reform"}"#).expect("write");

        let template = load_template(&request_args(Some(path), None)).expect("load");
        assert_eq!(template.get("first_year"), Some("2017"));
        assert_eq!(template.get("label"), Some("reform"));
    }

    #[test]
    fn test_load_user_mods_from_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reform.yaml");
        fs::write(&path, "_II_em: [4000]\n").expect("write");

        let template = load_template(&request_args(None, Some(path))).expect("load");
        let mods: serde_json::Value =
            serde_json::from_str(template.get("user_mods").expect("user_mods")).expect("json");
        assert_eq!(mods["2017"]["_II_em"][0], 4000);
    }

    #[test]
    fn test_load_template_defaults_to_empty() {
        let template = load_template(&request_args(None, None)).expect("load");
        assert!(template.is_empty());
    }

    #[test]
    fn test_load_template_rejects_bad_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("template.json");
        fs::write(&path, "{not json").expect("write");

        assert!(load_template(&request_args(Some(path), None)).is_err());
    }

    #[test]
    fn test_job_set_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.json");
        let job_set = JobSet::new(
            Uuid::new_v4(),
            vec![
                AcceptedJob::new("j0", WorkerAddress::new("a:1")),
                AcceptedJob::new("j1", WorkerAddress::new("b:2")),
            ],
        );

        save_job_set(&job_set, &path).expect("save");
        let loaded = load_job_set(&path).expect("load");
        assert_eq!(loaded, job_set);
    }

    fn saved_job_set(dir: &Path) -> PathBuf {
        let path = dir.join("jobs.json");
        let job_set = JobSet::new(
            Uuid::new_v4(),
            vec![AcceptedJob::new("j0", WorkerAddress::new("127.0.0.1:1"))],
        );
        save_job_set(&job_set, &path).expect("save");
        path
    }

    #[tokio::test]
    async fn test_poll_and_collect_reject_invalid_transport() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job_set = saved_job_set(dir.path());
        let zero_timeout = TransportArgs {
            timeout_ms: 0,
            concurrency: DEFAULT_CONCURRENCY,
        };
        let zero_concurrency = TransportArgs {
            timeout_ms: 1000,
            concurrency: 0,
        };

        let err = run_poll_command(PollArgs {
            job_set: job_set.clone(),
            transport: zero_timeout.clone(),
            json: false,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timeout"));

        let err = run_poll_command(PollArgs {
            job_set: job_set.clone(),
            transport: zero_concurrency.clone(),
            json: false,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("concurrency"));

        let err = run_collect_command(CollectArgs {
            job_set: job_set.clone(),
            transport: zero_timeout,
            output: None,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timeout"));

        let err = run_collect_command(CollectArgs {
            job_set,
            transport: zero_concurrency,
            output: None,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_load_missing_job_set_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_job_set(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read job set"));
    }
}
