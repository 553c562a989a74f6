//! mysql2sqlite CLI - incremental MySQL to SQLite replication of mail account data.

use clap::{Parser, Subcommand};
use mysql2sqlite::checkpoint::CheckpointStore;
use mysql2sqlite::{Config, HealthCheckResult, Orchestrator, ReplicaError, RunReport, TargetDb};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mysql2sqlite")]
#[command(about = "Incremental MySQL to SQLite replication for mail-server account data")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one replication pass over all configured tables
    Run {
        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Run a pass every sync.interval_secs until interrupted
    Watch {
        /// Override the interval between passes, in seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// List the stored watermark of every replicated table
    Status,

    /// Clear a table's watermark so the next pass re-extracts it fully
    Reset {
        /// Target table name
        #[arg(long)]
        table: String,
    },

    /// Report schema drift between source and replica without syncing
    CheckSchema,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, ReplicaError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run { workers } => {
            if let Some(w) = workers {
                config.sync.workers = w.max(1);
            }
            let cancel_token = setup_signal_handler()?;
            let orchestrator = Orchestrator::connect(config).await?;
            let report = orchestrator.sync(cancel_token.clone()).await;
            orchestrator.close().await;

            print_report(&report, cli.output_json)?;
            if cancel_token.is_cancelled() {
                return Err(ReplicaError::Cancelled);
            }
            Ok(ExitCode::from(report.status.exit_code()))
        }

        Commands::Watch { interval_secs } => {
            let interval = Duration::from_secs(interval_secs.unwrap_or(config.sync.interval_secs));
            let cancel_token = setup_signal_handler()?;
            let orchestrator = Orchestrator::connect(config).await?;

            info!(interval_secs = interval.as_secs(), "Watching for changes");
            let last_code = loop {
                let report = orchestrator.sync(cancel_token.clone()).await;
                print_report(&report, cli.output_json)?;
                let code = report.status.exit_code();

                tokio::select! {
                    _ = cancel_token.cancelled() => break code,
                    _ = tokio::time::sleep(interval) => {}
                }
            };

            info!("Watch stopped");
            orchestrator.close().await;
            Ok(ExitCode::from(last_code))
        }

        Commands::Status => {
            let target = TargetDb::open(&config.target, 1).await?;
            let checkpoints = CheckpointStore::new(target.pool().clone());
            checkpoints.init_schema().await?;
            let watermarks = checkpoints.list().await?;
            target.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&watermarks)?);
            } else {
                println!("Watermarks ({}):", config.target.path.display());
                for table in &config.tables {
                    let name = table.target_name();
                    match watermarks.iter().find(|w| w.table_name == name) {
                        Some(w) => println!(
                            "  {}: {} (last success {})",
                            name,
                            w.last_value
                                .map(|v| v.to_string())
                                .unwrap_or_else(|| "-".to_string()),
                            w.last_success_at.format("%Y-%m-%d %H:%M:%S UTC")
                        ),
                        None => println!("  {}: never synced", name),
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Reset { table } => {
            if config.table(&table).is_none() {
                return Err(ReplicaError::Config(format!(
                    "table '{}' is not configured",
                    table
                )));
            }

            let target = TargetDb::open(&config.target, 1).await?;
            let checkpoints = CheckpointStore::new(target.pool().clone());
            checkpoints.init_schema().await?;
            let existed = checkpoints.reset(&table).await?;
            target.close().await;

            if existed {
                println!("Watermark for {} cleared; next pass re-extracts the table", table);
            } else {
                println!("No watermark stored for {}", table);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::CheckSchema => {
            let orchestrator = Orchestrator::connect(config).await?;
            let checks = orchestrator.check_schema().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                println!("Schema Check Results:");
                for check in &checks {
                    if let Some(ref err) = check.error {
                        println!("  ✗ {}: {}", check.table_name, err);
                    } else if check.drift.is_empty() {
                        println!("  ✓ {}", check.table_name);
                    } else {
                        println!("  ✗ {}", check.table_name);
                        for drift in &check.drift {
                            println!("    - {}", drift);
                        }
                    }
                }
            }

            let clean = checks
                .iter()
                .all(|c| c.error.is_none() && c.drift.is_empty());
            Ok(if clean { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::connect(config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;

            print_health(&result, cli.output_json)?;
            Ok(if result.healthy { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<(), ReplicaError> {
    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    let duration = (report.completed_at - report.started_at).num_milliseconds() as f64 / 1000.0;
    println!("\nSync {}!", report.status);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", duration);
    for result in &report.results {
        println!(
            "  {:<16} {:?}: applied {}, deleted {}, failed {}, watermark {}",
            result.table_name,
            result.outcome,
            result.rows_applied,
            result.rows_deleted,
            result.rows_failed,
            result
                .new_watermark
                .map(|w| w.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        if let Some(ref err) = result.error {
            println!("    Error: {}", err);
        }
        for row_error in &result.row_errors {
            println!("    Row: {}", row_error);
        }
    }
    Ok(())
}

fn print_health(result: &HealthCheckResult, json: bool) -> Result<(), ReplicaError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("Health Check Results:");
    println!(
        "  Source (MySQL): {} ({}ms)",
        if result.source_connected { "OK" } else { "FAILED" },
        result.source_latency_ms
    );
    if let Some(ref err) = result.source_error {
        println!("    Error: {}", err);
    }
    println!(
        "  Target (SQLite): {} ({}ms)",
        if result.target_connected { "OK" } else { "FAILED" },
        result.target_latency_ms
    );
    if let Some(ref err) = result.target_error {
        println!("    Error: {}", err);
    }
    println!(
        "\n  Overall: {}",
        if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
    );
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (service manager stop).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, ReplicaError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping after in-flight batches roll back...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, ReplicaError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after in-flight batches roll back...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
