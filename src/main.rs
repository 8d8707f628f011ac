//! BANDWISE - Band-Keeping Process Advisor
//!
//! Serves checked, explained setpoint recommendations over HTTP, or runs a
//! single reasoning call from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Serve the latest bundle under ./artifacts on 0.0.0.0:8080
//! cargo run --release
//!
//! # One-shot advice for a saved row
//! ./bandwise advise --bundle artifacts/run_20240101_120000/best_model \
//!     --simulator artifacts/simulator --row row.json --measurement 5.2
//!
//! # Feed a synthetic stream through a bundle
//! ./replay --bundle artifacts/run_20240101_120000 --simulator artifacts/simulator
//! ```
//!
//! # Environment Variables
//!
//! - `BANDWISE_CONFIG`: Path to the TOML config (default: ./bandwise.toml)
//! - `BANDWISE_CORS_ORIGINS`: Comma-separated origins allowed by CORS
//! - `RUST_LOG`: Logging level (default: info)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bandwise::api::{create_app, ApiState};
use bandwise::config::watcher::{run_bundle_watcher, BundleEvent, BundleWatcher};
use bandwise::config::{self, AdvisorConfig, BundlesConfig};
use bandwise::models::bundle;
use bandwise::reasoning::registry::run_eviction_loop;
use bandwise::reasoning::{ModelGeneration, ReasoningSession, SessionRegistry};
use bandwise::types::FeatureRow;

/// How long running tasks get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "bandwise")]
#[command(about = "Band-keeping process advisor: checked, explained setpoint recommendations")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides BANDWISE_CONFIG and ./bandwise.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the HTTP advisor (default)
    Serve {
        /// Override the server address (default: "0.0.0.0:8080")
        #[arg(short, long, value_name = "HOST:PORT")]
        addr: Option<String>,
    },

    /// Run reasoning calls for one saved row and print each result as JSON
    Advise {
        /// Policy bundle directory
        #[arg(long)]
        bundle: PathBuf,
        /// Simulator directory
        #[arg(long)]
        simulator: Option<PathBuf>,
        /// JSON file holding a `{feature: value}` object
        #[arg(long)]
        row: PathBuf,
        /// Current quality measurement
        #[arg(long, allow_negative_numbers = true)]
        measurement: f64,
        /// Number of calls, to watch the smoothed values settle
        #[arg(long, default_value = "1")]
        repeat: u32,
    },
}

// ============================================================================
// Configuration
// ============================================================================

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Load the config under a temporary plain-text subscriber so that its
/// warnings are visible before the final log format is known.
fn load_config(path: Option<&Path>) -> Result<AdvisorConfig> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .finish();
    tracing::subscriber::with_default(bootstrap, || match path {
        Some(p) => AdvisorConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(AdvisorConfig::load()),
    })
}

fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Simulator directory to pair with served bundles: the configured one,
/// or `<base_dir>/simulator` when it exists.
fn serving_simulator_dir(bundles: &BundlesConfig) -> Option<PathBuf> {
    bundles.simulator_dir.clone().or_else(|| {
        let fallback = bundles.simulator_path();
        fallback.is_dir().then_some(fallback)
    })
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    BundleWatcher,
    BundlePublisher,
    SessionEviction,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::BundleWatcher => write!(f, "BundleWatcher"),
            Self::BundlePublisher => write!(f, "BundlePublisher"),
            Self::SessionEviction => write!(f, "SessionEviction"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the bundle watcher and the task that publishes what it finds.
fn spawn_bundle_tasks(
    task_set: &mut JoinSet<Result<TaskName>>,
    registry: Arc<SessionRegistry>,
    bundles: &BundlesConfig,
    current: Option<PathBuf>,
    cancel_token: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel::<BundleEvent>(4);
    let (failed_tx, failed_rx) = mpsc::channel::<PathBuf>(4);
    let watcher = BundleWatcher::new(bundles.base_dir.clone(), bundles.bundle.clone(), current);
    let interval = Duration::from_secs(bundles.watch_interval_secs);

    let watch_cancel = cancel_token.clone();
    task_set.spawn(async move {
        run_bundle_watcher(watcher, interval, tx, failed_rx, watch_cancel).await;
        Ok(TaskName::BundleWatcher)
    });

    let simulator_dir = serving_simulator_dir(bundles);
    task_set.spawn(async move {
        // Ends once the watcher drops its sender
        while let Some(event) = rx.recv().await {
            let BundleEvent::NewBundle(dir) = event else {
                continue;
            };
            match SessionRegistry::load_generation(dir.clone(), simulator_dir.clone()).await {
                Ok(generation) => {
                    let reloaded = registry.publish_generation(generation).await;
                    info!(bundle = %dir.display(), sessions = reloaded, "[BundlePublisher] Hot-swapped model generation");
                }
                Err(e) => {
                    warn!(bundle = %dir.display(), error = %e, "[BundlePublisher] New bundle failed to load, keeping current generation");
                    // Dropped only when the retry queue is already full
                    let _ = failed_tx.try_send(dir);
                }
            }
        }
        Ok(TaskName::BundlePublisher)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the remaining tasks observe the cancellation
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(result) = task_set.join_next().await {
            if let Ok(Ok(task_name)) = result {
                info!("Supervisor: task {} stopped", task_name);
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("Supervisor: tasks still running after {:?}, aborting", SHUTDOWN_GRACE);
        task_set.abort_all();
    }

    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_server(config: &AdvisorConfig, addr: String, cancel_token: CancellationToken) -> Result<()> {
    let registry = Arc::new(SessionRegistry::from_config(config));
    let bundles = &config.bundles;
    let simulator_dir = serving_simulator_dir(bundles);

    info!(
        base_dir = %bundles.base_dir.display(),
        bundle = bundles.bundle.as_deref().unwrap_or("<latest>"),
        simulator = simulator_dir.as_ref().map(|d| d.display().to_string()).unwrap_or_default(),
        "Resolving initial model bundle"
    );

    // A failed initial load is not fatal: sessions answer NOT_READY and the
    // watcher keeps offering the bundle to the publisher on every poll until
    // it loads.
    let mut served = None;
    match bundle::locate(&bundles.base_dir, bundles.bundle.as_deref()) {
        Some(dir) => match SessionRegistry::load_generation(dir.clone(), simulator_dir.clone()).await {
            Ok(generation) => {
                registry.publish_generation(generation).await;
                served = Some(dir);
            }
            Err(e) => warn!(bundle = %dir.display(), error = %e, "Initial bundle failed to load"),
        },
        None => warn!("No policy bundle found, serving NOT_READY until one appears"),
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP API listening on http://{}/api/v1", addr);

    let state = ApiState::new(Arc::clone(&registry), bundles.base_dir.clone(), simulator_dir);
    let app = create_app(state, config.server.body_limit_bytes);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: HTTP Server
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    // Task 2 + 3: Bundle watcher and publisher
    if bundles.watch {
        spawn_bundle_tasks(
            &mut task_set,
            Arc::clone(&registry),
            bundles,
            served,
            cancel_token.clone(),
        );
    } else {
        info!("Bundle watching disabled");
    }

    // Task 4: Idle session eviction
    let max_idle = Duration::from_secs(config.registry.session_idle_secs);
    let interval = Duration::from_secs(config.registry.eviction_interval_secs);
    let evict_cancel = cancel_token.clone();
    task_set.spawn(async move {
        run_eviction_loop(registry, max_idle, interval, evict_cancel).await;
        Ok(TaskName::SessionEviction)
    });

    run_supervisor(&mut task_set, cancel_token).await
}

fn run_advise(
    config: &AdvisorConfig,
    bundle_dir: &Path,
    simulator_dir: Option<&Path>,
    row_path: &Path,
    measurement: f64,
    repeat: u32,
) -> Result<()> {
    let generation = ModelGeneration::load(bundle_dir, simulator_dir)
        .with_context(|| format!("Failed to load bundle {}", bundle_dir.display()))?;
    let raw = std::fs::read_to_string(row_path)
        .with_context(|| format!("Failed to read {}", row_path.display()))?;
    let row: FeatureRow = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON object of feature values", row_path.display()))?;

    let mut session = ReasoningSession::with_generation(
        Arc::new(generation),
        config.reasoning.smoothing_window,
        config.reasoning.top_k,
    );
    for _ in 0..repeat.max(1) {
        let result = session.reasoned_advice(&row, measurement)?;
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let advisor_config = load_config(args.config.as_deref())?;
    init_logging(args.log_json || advisor_config.logging.json);
    config::init(advisor_config);
    let config = config::get();

    match args.command.unwrap_or(SubCommand::Serve { addr: None }) {
        SubCommand::Advise {
            bundle,
            simulator,
            row,
            measurement,
            repeat,
        } => run_advise(config, &bundle, simulator.as_deref(), &row, measurement, repeat),
        SubCommand::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.server.addr.clone());

            info!("BANDWISE {} starting", env!("CARGO_PKG_VERSION"));

            // Graceful shutdown via Ctrl+C
            let cancel_token = CancellationToken::new();
            let shutdown_token = cancel_token.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Received Ctrl+C, initiating shutdown");
                shutdown_token.cancel();
            });

            run_server(config, addr, cancel_token).await?;
            info!("BANDWISE shutdown complete");
            Ok(())
        }
    }
}
