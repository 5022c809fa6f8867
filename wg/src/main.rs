//! Workgate - priority task scheduler
//!
//! CLI entry point: inspects configuration and drives synthetic workloads
//! through a scheduler.

use std::fs;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use workgate::cli::{Cli, Command, OutputFormat, get_log_path};
use workgate::config::Config;
use workgate::scheduler::Scheduler;
use workgate::simulate::{self, SimulationPlan, SimulationReport};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Config { format } => cmd_config(&config, format),
        Command::Simulate {
            tasks,
            min_ms,
            max_ms,
            fail_rate,
            clear_after_ms,
            max_concurrent,
            max_requests,
            window_ms,
            format,
        } => {
            let mut config = config;
            if let Some(max_concurrent) = max_concurrent {
                config.scheduler.max_concurrent = max_concurrent;
            }
            if let Some(max_requests) = max_requests {
                config.scheduler.max_requests_per_window = max_requests;
            }
            if let Some(window_ms) = window_ms {
                config.scheduler.rate_window_ms = window_ms;
            }

            let plan = SimulationPlan {
                tasks,
                min_duration: Duration::from_millis(min_ms),
                max_duration: Duration::from_millis(max_ms),
                fail_rate,
                clear_after: clear_after_ms.map(Duration::from_millis),
            };
            cmd_simulate(&config, &plan, format).await
        }
    }
}

fn cmd_config(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_config: called");
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(config).context("Failed to render config as JSON")?,
        OutputFormat::Yaml | OutputFormat::Text => {
            serde_yaml::to_string(config).context("Failed to render config as YAML")?
        }
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

async fn cmd_simulate(config: &Config, plan: &SimulationPlan, format: OutputFormat) -> Result<()> {
    debug!(?plan, ?format, "cmd_simulate: called");
    config.validate()?;

    let scheduler = Scheduler::new(config.scheduler.clone()).context("Failed to create scheduler")?;
    let report = simulate::run(&scheduler, plan).await?;
    scheduler.shutdown().await;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to render report as JSON")?
            );
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(&report).context("Failed to render report as YAML")?);
        }
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    let outcomes = &report.outcomes;
    println!(
        "{} Simulated {} tasks in {}ms",
        "✓".green(),
        report.tasks.to_string().cyan(),
        report.elapsed_ms
    );
    println!("  Completed:    {}", outcomes.completed.to_string().green());
    println!("  Failed:       {}", outcomes.failed.to_string().red());
    println!("  Rate limited: {}", outcomes.rate_limited.to_string().yellow());
    println!("  Cleared:      {}", outcomes.cleared.to_string().yellow());
    if outcomes.aborted > 0 {
        println!("  Aborted:      {}", outcomes.aborted.to_string().red());
    }

    let metrics = &report.metrics;
    println!("Scheduler:");
    println!(
        "  Peak concurrent: {} / {}",
        metrics.peak_concurrent, report.stats.max_concurrent
    );
    println!("  Peak queue depth: {}", metrics.peak_queue_depth);
    println!("  Rate limit remaining: {}", report.stats.rate_limit_remaining);

    let order: Vec<_> = report.start_order.iter().map(|p| p.as_str()).collect();
    println!("Start order: {}", order.join(" ").dimmed());
}
