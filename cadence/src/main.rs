//! Cadence - per-key cooldown job scheduler
//!
//! CLI entry point for running and inspecting the scheduler.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{info, warn};

use cadence::cli::{Cli, Command, OutputFormat};
use cadence::config::{self, Config};
use cadence::executor::{CommandExecutor, JobExecutor};
use cadence::logview::{FOLLOW_INTERVAL, LogFollower};
use cadence::monitor::{self, Monitor};
use cadence::scheduler::{Capacity, Scheduler, stagger_plan};
use cadence::sources::Sources;

fn setup_logging(verbose: bool, log_stderr: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if log_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        let log_path = config::log_path();
        if let Some(log_dir) = log_path.parent() {
            fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }
        let log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .context("Failed to open log file")?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_stderr).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            keys,
            contexts,
            max_concurrent,
        } => cmd_run(with_overrides(config, keys, contexts, max_concurrent)).await,
        Command::Check { keys, contexts } => cmd_check(with_overrides(config, keys, contexts, None)),
        Command::Status { format } => cmd_status(&config, format),
        Command::Logs { follow, lines } => cmd_logs(follow, lines).await,
    }
}

fn with_overrides(
    mut config: Config,
    keys: Option<PathBuf>,
    contexts: Option<PathBuf>,
    max_concurrent: Option<Capacity>,
) -> Config {
    if let Some(keys) = keys {
        config.sources.keys_file = keys;
    }
    if let Some(contexts) = contexts {
        config.sources.contexts_file = contexts;
    }
    if let Some(capacity) = max_concurrent {
        config.schedule.max_concurrent = capacity;
    }
    config
}

fn load_sources(config: &Config) -> Result<Sources> {
    Sources::load(&config.sources.keys_file, &config.sources.contexts_file).context("Failed to load sources")
}

/// Validate config and sources
fn cmd_check(config: Config) -> Result<()> {
    config.validate()?;
    let sources = load_sources(&config)?;
    let plan = stagger_plan(sources.keys().len(), config.schedule.stagger());
    let span = plan.last().copied().unwrap_or_default();

    println!("Configuration OK");
    println!("  Keys:           {}", sources.keys().len());
    println!("  Contexts:       {}", sources.contexts().len());
    println!("  Max concurrent: {}", config.schedule.max_concurrent);
    println!("  Cooldown:       {}s", config.schedule.cooldown_secs);
    println!("  Stagger span:   {}s", span.as_secs());
    Ok(())
}

/// Run the scheduler until SIGINT or SIGTERM
async fn cmd_run(config: Config) -> Result<()> {
    info!("Cadence starting...");

    config.validate()?;
    let sources = Arc::new(load_sources(&config)?);
    info!(
        keys = sources.keys().len(),
        contexts = sources.contexts().len(),
        max_concurrent = %config.schedule.max_concurrent,
        "Startup validation passed"
    );

    let executor: Arc<dyn JobExecutor> = Arc::new(CommandExecutor::from_config(&config.executor));
    let scheduler = Scheduler::new(config.schedule.clone(), sources, executor);
    let handle = scheduler.handle();

    let scheduler_task = tokio::spawn(scheduler.run());
    info!("Scheduler started");

    let status_path = config.monitor.status_file.clone();
    let monitor = Monitor::new(
        handle.clone(),
        std::time::Duration::from_secs(config.monitor.interval_secs),
        status_path.clone(),
    );
    let monitor_task = tokio::spawn(monitor.run());

    println!("Cadence running. Press Ctrl+C to stop.");
    wait_for_signal().await?;

    info!("Cadence shutting down...");
    let final_snapshot = handle.snapshot().await.ok();
    handle.shutdown().await?;

    let stats = scheduler_task.await.context("Scheduler task failed")?;
    monitor_task.abort();

    if let Some(mut snapshot) = final_snapshot {
        snapshot.stats = stats.clone();
        snapshot.accepting = false;
        if let Err(e) = monitor::write_status_file(&status_path, &snapshot) {
            warn!(error = %e, "Failed to write final status");
        }
    }

    info!(?stats, "Cadence stopped");
    println!(
        "Stopped: {} dispatched, {} succeeded, {} failed, {} skipped",
        stats.total_dispatched, stats.total_succeeded, stats.total_failed, stats.total_skipped
    );
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}

/// Show the latest status snapshot
fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    let path = &config.monitor.status_file;
    if !path.exists() {
        println!("No status file found at: {}", path.display());
        println!("The scheduler may not have been started yet.");
        return Ok(());
    }

    let snapshot = monitor::read_status_file(path)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Text => print!("{}", monitor::render_text(&snapshot)),
    }
    Ok(())
}

/// Print the last `lines` log lines, then optionally keep printing new ones
async fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    let log_path = config::log_path();
    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        return Ok(());
    }

    let mut follower = LogFollower::new(&log_path);
    for line in follower.tail(lines)? {
        println!("{}", line);
    }
    if !follow {
        return Ok(());
    }

    eprintln!("Following {} (Ctrl+C to stop)", log_path.display());
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for line in follower.poll()? {
                    println!("{}", line);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
