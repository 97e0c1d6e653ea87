use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::{Commands, RecordsCommands};
use harvestr::catalog::JobCatalog;
use harvestr::config::{GlobalConfig, load_config};
use harvestr::domain::JobState;
use harvestr::scheduler::{CycleReport, CycleTrigger, PoolScheduler, StatusSnapshot};
use harvestr::storage::{self, DynRecordStore, Filter, Projection};

fn setup_logging(config: &GlobalConfig) -> Result<()> {
    // Create log directory
    let log_dir = config.storage.data_dir.join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("harvestr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_store(config: &GlobalConfig) -> Result<Arc<DynRecordStore>> {
    let store = storage::open(&config.storage.data_dir)
        .with_context(|| format!("Failed to open record store in {}", config.storage.data_dir.display()))?;
    Ok(Arc::new(store))
}

fn parse_filters(exprs: &[String]) -> Result<Vec<Filter>> {
    exprs
        .iter()
        .map(|expr| expr.parse::<Filter>().with_context(|| format!("Bad filter '{}'", expr)))
        .collect()
}

fn colored_state(state: JobState) -> ColoredString {
    match state {
        JobState::Idle => state.as_str().green(),
        JobState::Running => state.as_str().cyan(),
        JobState::Error => state.as_str().red(),
        JobState::Blocked => state.as_str().yellow(),
    }
}

fn print_report(report: &CycleReport) {
    println!(
        "{} {} jobs: {} succeeded, {} failed, {} blocked ({} ms)",
        "Cycle finished:".green(),
        report.jobs,
        report.succeeded.to_string().green(),
        report.failed.to_string().red(),
        report.blocked.to_string().yellow(),
        report.elapsed_ms
    );
}

async fn run_application(cli: &Cli, config: &GlobalConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Daemon { no_run_on_start } => handle_daemon_command(*no_run_on_start, config).await,
        Commands::RunAll => handle_run_all_command(config).await,
        Commands::Run { id } => handle_run_command(id, config).await,
        Commands::Jobs => handle_jobs_command(config),
        Commands::Status { json } => handle_status_command(*json, config),
        Commands::Records { command } => handle_records_command(command, config),
    }
}

async fn handle_daemon_command(no_run_on_start: bool, config: &GlobalConfig) -> Result<()> {
    // Only the daemon mirrors the status snapshot
    let scheduler =
        PoolScheduler::from_config(config, open_store(config)?).with_snapshot_path(config.snapshot_path());
    let run_on_start = config.scheduler.run_on_start && !no_run_on_start;

    println!(
        "{} every {}s, concurrency {}",
        "Daemon started:".cyan(),
        config.scheduler.interval_secs,
        scheduler.concurrency()
    );

    let trigger = CycleTrigger::new(scheduler, config.scheduler.interval()).with_run_on_start(run_on_start);
    trigger
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    println!("{}", "Daemon stopped".cyan());
    Ok(())
}

async fn handle_run_all_command(config: &GlobalConfig) -> Result<()> {
    let scheduler = PoolScheduler::from_config(config, open_store(config)?);
    match scheduler.run_cycle().await {
        Some(report) => print_report(&report),
        None => println!("{}", "A cycle is already running".yellow()),
    }
    Ok(())
}

async fn handle_run_command(id: &str, config: &GlobalConfig) -> Result<()> {
    let scheduler = PoolScheduler::from_config(config, open_store(config)?);
    let Some(exit_code) = scheduler.run_single_job(id).await else {
        eyre::bail!("Job '{}' is unknown or already running", id);
    };

    let state = scheduler
        .snapshot()
        .await
        .jobs
        .get(id)
        .map(|status| status.state)
        .unwrap_or_default();
    println!("{} {} exited with {} ({})", "Run:".green(), id, exit_code, colored_state(state));

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn handle_jobs_command(config: &GlobalConfig) -> Result<()> {
    let jobs = JobCatalog::from_config(&config.catalog).load();
    println!("{} {} jobs", "Catalog:".green(), jobs.len());
    for job in jobs {
        let kind = if job.implemented {
            "specialized".green()
        } else {
            "fallback".yellow()
        };
        println!("  {:<24} {:<28} {:<32} {} ({})", job.id, job.name, job.source, kind, job.executor);
    }
    Ok(())
}

fn handle_status_command(json: bool, config: &GlobalConfig) -> Result<()> {
    let path = config.snapshot_path();
    if !path.exists() {
        println!("{} no snapshot at {}", "Status:".yellow(), path.display());
        return Ok(());
    }

    let snapshot = StatusSnapshot::read_from(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let cycle = if snapshot.running { "running".cyan() } else { "idle".green() };
    let last = snapshot
        .last_cycle_started_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!("{} cycle {}, last started {}", "Status:".green(), cycle, last);

    for (id, status) in &snapshot.jobs {
        let last_run = status
            .last_run_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let exit_code = status
            .last_exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<24} {:<10} exit {:<4} {}", id, colored_state(status.state), exit_code, last_run);
    }
    println!("  {} runs in history", snapshot.history.len());
    Ok(())
}

fn handle_records_command(command: &RecordsCommands, config: &GlobalConfig) -> Result<()> {
    let store = open_store(config)?;

    match command {
        RecordsCommands::Get { source, external_id } => match store.get(external_id, source)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => eyre::bail!("No record {}/{}", source, external_id),
        },
        RecordsCommands::List { filters, fields } => {
            let filters = parse_filters(filters)?;
            let projection = if fields.is_empty() {
                Projection::all()
            } else {
                Projection::only(fields.as_slice())
            };
            for row in store.list(&filters, &projection)? {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        RecordsCommands::Count { filters } => {
            let filters = parse_filters(filters)?;
            println!("{}", store.count(&filters)?);
        }
        RecordsCommands::Delete { filters } => {
            let filters = parse_filters(filters)?;
            if filters.is_empty() {
                eyre::bail!("Refusing to delete without a filter");
            }
            let deleted = store.delete_many(&filters)?;
            println!("{} {} records", "Deleted:".red(), deleted);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;

    // Logging goes under the configured data directory
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
