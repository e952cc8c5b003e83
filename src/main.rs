use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use jobwright::jobs::builtin_registry;
use jobwright::scheduler::Mode;
use jobwright::{Config, Job, JobRegistry, JobSpec, JobStatus, Scheduler};

fn setup_logging(filter: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobwright")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("jobwright.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized at {}, writing to: {}", filter, log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run { workers, idle } => handle_run_command(*workers, *idle, config),
        Commands::Submit {
            name,
            payload,
            priority,
            depends_on,
            max_retries,
            timeout_ms,
            key,
            lane,
            urgent,
        } => {
            let mut spec = JobSpec::new(name.as_str())
                .with_priority(*priority)
                .with_dependencies(depends_on.iter().map(String::as_str))
                .with_lane(*lane)
                .with_urgent(*urgent);
            if let Some(raw) = payload {
                let value = serde_json::from_str(raw).context("Payload is not valid JSON")?;
                spec = spec.with_payload(value);
            }
            if let Some(n) = max_retries {
                spec = spec.with_max_retries(*n);
            }
            if let Some(ms) = timeout_ms {
                spec = spec.with_timeout(Duration::from_millis(*ms));
            }
            if let Some(k) = key {
                spec = spec.with_key(k.as_str());
            }
            handle_submit_command(spec, config)
        }
        Commands::List { status, name } => handle_list_command(*status, name.as_deref(), config),
        Commands::Status { id, detailed } => handle_status_command(id, *detailed, config),
        Commands::Cancel { id } => handle_cancel_command(id, config),
    }
}

fn handle_run_command(workers: Option<usize>, idle: bool, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if let Some(n) = workers {
        config.scheduler.concurrency.max_workers = n;
    }
    if idle {
        config.mode.mode = Mode::Idle;
    }
    config.validate()?;
    info!("Running scheduler with {} workers", config.scheduler.concurrency.max_workers);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run_daemon(config))
}

async fn run_daemon(config: Config) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(config, builtin_registry())?);
    if scheduler.restore_from_file().context("Failed to restore snapshot")? {
        let restored = scheduler.list(|_| true)?.len();
        println!("{} {} jobs from snapshot", "Restored".green(), restored);
    }

    let signal = scheduler.mode();
    println!(
        "{} {} workers, mode {} (budget {:.2}), handlers: {}",
        "Running:".green(),
        scheduler.config().scheduler.concurrency.max_workers,
        signal.mode,
        signal.budget_fraction,
        scheduler.registry().names().join(", ")
    );

    let mut runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    tokio::select! {
        res = &mut runner => {
            res.context("Scheduler task panicked")??;
            return Ok(());
        }
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
        }
    }

    println!("{}", "Shutting down...".yellow());
    scheduler.shutdown();
    runner.await.context("Scheduler task panicked")??;

    let stats = scheduler.stats()?;
    println!(
        "{} dispatched {}, succeeded {}, failed {}, retried {}, cancelled {}",
        "Stopped:".cyan(),
        stats.total_dispatched,
        stats.total_succeeded,
        stats.total_failed,
        stats.total_retried,
        stats.total_cancelled
    );
    Ok(())
}

/// Scheduler restored from the snapshot, for offline edits.
fn open_offline(config: &Config) -> Result<Scheduler> {
    if config.persistence.snapshot_path.is_none() {
        eyre::bail!("persistence.snapshot_path is not set; offline commands need a snapshot");
    }
    let scheduler = Scheduler::new(config.clone(), JobRegistry::new())?;
    scheduler.restore_from_file().context("Failed to load snapshot")?;
    Ok(scheduler)
}

fn handle_submit_command(spec: JobSpec, config: &Config) -> Result<()> {
    info!("Submitting job: {}", spec.name);
    let scheduler = open_offline(config)?;
    let id = scheduler.submit(spec)?;
    scheduler.save_snapshot().context("Failed to write snapshot")?;

    let job = scheduler.status(&id)?;
    println!("{} {} ({}, priority {:.3})", "Submitted:".green(), id, job.status, job.priority);
    Ok(())
}

fn handle_list_command(status: Option<JobStatus>, name: Option<&str>, config: &Config) -> Result<()> {
    info!("Listing jobs - status: {:?}, name: {:?}", status, name);
    let scheduler = open_offline(config)?;
    let jobs = scheduler.list(|j| status.is_none_or(|s| j.status == s) && name.is_none_or(|n| j.name == n))?;

    if jobs.is_empty() {
        println!("{}", "No jobs".dimmed());
        return Ok(());
    }
    for job in &jobs {
        println!(
            "{:<32} {:<12} {:<17} {:>6.3}  {}",
            job.id,
            job.name,
            colored_status(job.status),
            job.priority,
            format_time(job.created_at)
        );
    }
    println!("{} jobs", jobs.len());
    Ok(())
}

fn handle_status_command(id: &str, detailed: bool, config: &Config) -> Result<()> {
    info!("Getting status for job: {} (detailed: {})", id, detailed);
    let scheduler = open_offline(config)?;
    let job = scheduler.status(id)?;
    print_job(&job, detailed);
    Ok(())
}

fn handle_cancel_command(id: &str, config: &Config) -> Result<()> {
    info!("Cancelling job: {}", id);
    let scheduler = open_offline(config)?;
    if scheduler.cancel(id)? {
        scheduler.save_snapshot().context("Failed to write snapshot")?;
        println!("{} {}", "Cancelled:".red(), id);
    } else {
        let job = scheduler.status(id)?;
        println!("{} {} is already {}", "Unchanged:".yellow(), id, colored_status(job.status));
    }
    Ok(())
}

fn print_job(job: &Job, detailed: bool) {
    println!("{} {}", "Job:".green(), job.id);
    println!("  name:        {}", job.name);
    println!("  status:      {}", colored_status(job.status));
    println!("  priority:    {:.3} (hint {:.2})", job.priority, job.priority_hint);
    if job.urgent {
        println!("  lane:        {} (urgent)", job.lane);
    } else {
        println!("  lane:        {}", job.lane);
    }
    println!("  attempts:    {} of {}", job.retry_count + 1, job.max_retries + 1);
    println!("  created:     {}", format_time(job.created_at));
    if let Some(at) = job.started_at {
        println!("  started:     {}", format_time(at));
    }
    if let Some(at) = job.finished_at {
        println!("  finished:    {}", format_time(at));
    }
    if let Some(at) = job.retry_at {
        println!("  retry at:    {}", format_time(at));
    }
    if let Some(err) = &job.last_error {
        println!("  last error:  {}", err.red());
    }
    if let Some(result) = &job.result {
        println!("  result:      {}", result);
    }
    if !job.dependencies.is_empty() {
        let deps: Vec<&str> = job.dependencies.iter().map(String::as_str).collect();
        println!("  depends on:  {}", deps.join(", "));
    }

    if detailed {
        println!("  payload:     {}", job.payload);
        if let Some(key) = &job.key {
            println!("  key:         {}", key);
        }
        for (k, v) in &job.metadata {
            println!("  meta {}: {}", k, v);
        }
        println!("  transitions:");
        for change in &job.transitions {
            println!("    {}  {}", format_time(change.at), colored_status(change.status));
        }
    }
}

fn colored_status(status: JobStatus) -> ColoredString {
    let s = status.as_str();
    match status {
        JobStatus::Pending => s.dimmed(),
        JobStatus::Ready => s.cyan(),
        JobStatus::Running => s.blue(),
        JobStatus::Done => s.green(),
        JobStatus::FailedTransient => s.yellow(),
        JobStatus::FailedTerminal => s.red(),
        JobStatus::Cancelled => s.magenta(),
    }
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration; it carries the log level
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_filter()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
