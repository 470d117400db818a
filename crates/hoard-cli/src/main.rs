mod report;
mod worklist;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hoard_client::{
    DockerBackend, DockerCli, HttpBackend, KindRouter, SysinfoDiskProbe, WorkspaceCleanup,
};
use hoard_core::monitor::MonitorConfig;
use hoard_core::validate::ValidationConfig;
use hoard_core::{
    EXIT_FATAL, EXIT_SUCCESS, FetchItem, Orchestrator, OrchestratorConfig, RunState,
    TracingReporter,
};
use hoard_store::{JsonlStateStore, StoreConfig};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "hoard", version, about = "Parallel, resumable artifact fetcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every item of the work list
    Fetch(FetchArgs),

    /// Show what the state file records from previous runs
    Status {
        /// State file (defaults to HOARD_STATE_FILE or .hoard/state.jsonl)
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the work list in fetch order
    List {
        /// JSON work list (built-in default set if omitted)
        #[arg(short, long, env = "HOARD_WORKLIST")]
        worklist: Option<PathBuf>,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// JSON work list (built-in default set if omitted)
    #[arg(short, long, env = "HOARD_WORKLIST")]
    worklist: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long, env = "HOARD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Attempts per item before it is marked failed
    #[arg(long, env = "HOARD_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Timeout for one backend call, in seconds
    #[arg(long, env = "HOARD_PER_ATTEMPT_TIMEOUT_SECS", default_value_t = 1800)]
    per_attempt_timeout_secs: u64,

    /// Deadline for the whole run, in seconds
    #[arg(long, env = "HOARD_GLOBAL_TIMEOUT_SECS")]
    global_timeout_secs: Option<u64>,

    /// Free space below which the run stops, in GiB
    #[arg(long, env = "HOARD_MIN_FREE_GIB", default_value_t = 2)]
    min_free_gib: u64,

    /// Validate and report without fetching anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Skip items that already succeeded in a previous run
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Categories to leave out (repeatable or comma separated)
    #[arg(long = "skip-category", env = "HOARD_SKIP_CATEGORIES", value_delimiter = ',')]
    skip_categories: Vec<String>,

    /// Skip pre-validation of item references
    #[arg(long, default_value_t = false)]
    no_validate: bool,

    /// State file (defaults to HOARD_STATE_FILE or .hoard/state.jsonl)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Where plain files are downloaded
    #[arg(long, env = "HOARD_DOWNLOAD_DIR", default_value = ".hoard/downloads")]
    download_dir: PathBuf,

    /// Also run `docker image prune` when disk space runs low
    #[arg(long, default_value_t = false)]
    prune_images: bool,

    /// Write a per-item CSV report to this path
    #[arg(long)]
    report_csv: Option<PathBuf>,

    /// Print the report as JSON instead of a text summary
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hoard=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch(args) => cmd_fetch(args).await,
        Commands::Status { state_file, json } => {
            cmd_status(state_file, json).await?;
            Ok(EXIT_SUCCESS)
        }
        Commands::List { worklist, json } => {
            cmd_list(worklist.as_deref(), json)?;
            Ok(EXIT_SUCCESS)
        }
    }
}

fn load_items(path: Option<&Path>) -> Result<Vec<FetchItem>> {
    match path {
        Some(path) => worklist::load(path),
        None => {
            tracing::info!("No work list given, using the built-in default set");
            Ok(worklist::default_items())
        }
    }
}

fn open_store(state_file: Option<PathBuf>) -> Result<JsonlStateStore> {
    let mut config = StoreConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    if let Some(path) = state_file {
        config.path = path;
    }
    Ok(JsonlStateStore::new(config))
}

fn build_config(args: &FetchArgs) -> OrchestratorConfig {
    let per_attempt_timeout = Duration::from_secs(args.per_attempt_timeout_secs);
    let mut config = OrchestratorConfig::default()
        .with_concurrency(args.concurrency)
        .with_max_attempts(args.max_attempts)
        .with_per_attempt_timeout(per_attempt_timeout)
        .with_dry_run(args.dry_run)
        .with_resume(args.resume)
        .with_skip_categories(args.skip_categories.iter().map(|c| c.trim().to_string()))
        .with_monitor(MonitorConfig {
            hard_min_bytes: args.min_free_gib * GIB,
            ..Default::default()
        })
        .with_validation(ValidationConfig {
            enabled: !args.no_validate,
            ..Default::default()
        });
    if let Some(secs) = args.global_timeout_secs {
        config = config.with_global_timeout(Duration::from_secs(secs));
    }
    config
}

async fn cmd_fetch(args: FetchArgs) -> Result<i32> {
    let items = load_items(args.worklist.as_deref())?;
    let config = build_config(&args);
    let store = open_store(args.state_file.clone())?;

    let http = HttpBackend::with_timeout(&args.download_dir, config.per_attempt_timeout)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to create HTTP client")?;
    // Cleanup must not touch partials the HTTP backend is still writing.
    let mut cleanup = WorkspaceCleanup::new(&args.download_dir)
        .with_active_downloads(http.active_downloads().clone());
    let mut backend = KindRouter::new(http);

    match DockerCli::locate() {
        Ok(cli) => {
            if args.prune_images {
                cleanup = cleanup.with_docker_prune(cli.clone());
            }
            backend = backend.with_docker(DockerBackend::new(cli));
        }
        Err(e) => {
            tracing::warn!(error = %e, "docker not available, image and model items will fail");
        }
    }

    tokio::fs::create_dir_all(&args.download_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.download_dir.display()))?;
    let disk = SysinfoDiskProbe::new(&args.download_dir);

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight attempts");
            signal_token.cancel();
        }
    });

    tracing::info!(
        items = items.len(),
        state_file = %store.path().display(),
        docker = backend.has_docker(),
        "Starting fetch"
    );

    let orchestrator = Orchestrator::new(backend, store, disk, cleanup, config);
    let run_report = orchestrator
        .run(items, cancel_token, Arc::new(TracingReporter))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if let Some(path) = &args.report_csv {
        report::export_csv(&run_report, path)?;
        tracing::info!(path = %path.display(), "CSV report written");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run_report)?);
    } else {
        print!("{}", report::render_text(&run_report));
    }

    Ok(run_report.exit_code())
}

async fn cmd_status(state_file: Option<PathBuf>, json: bool) -> Result<()> {
    let store = open_store(state_file)?;
    let records = store.records().await.map_err(|e| anyhow::anyhow!(e))?;
    let total_records = records.len();
    let state = RunState::from_records(records);

    if json {
        let failures: Vec<_> = state
            .failures()
            .into_iter()
            .map(|(id, entry)| {
                serde_json::json!({
                    "item_id": id,
                    "error_class": entry.error_class,
                    "attempts": entry.attempts,
                })
            })
            .collect();
        let summary = serde_json::json!({
            "state_file": store.path(),
            "records": total_records,
            "succeeded": state.succeeded_count(),
            "failed": state.failed_count(),
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if total_records == 0 {
        println!("No runs recorded in {}", store.path().display());
        return Ok(());
    }

    println!(
        "{}: {} records, {} succeeded, {} failed",
        store.path().display(),
        total_records,
        state.succeeded_count(),
        state.failed_count()
    );
    for (id, entry) in state.failures() {
        println!("  {} [{}] after {} attempts", id, entry.error_class, entry.attempts);
    }

    Ok(())
}

fn cmd_list(path: Option<&Path>, json: bool) -> Result<()> {
    let items = load_items(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for item in &items {
        println!(
            "{:>3}  {:<6} {:<12} {:<20} {}",
            item.priority, item.kind, item.category, item.id, item.source_ref
        );
    }
    println!("\nTotal: {} items", items.len());

    Ok(())
}
