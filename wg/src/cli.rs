//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Workgate - priority task scheduler with admission control
#[derive(Parser)]
#[command(
    name = "wg",
    about = "Priority task scheduler with concurrency and rate-limit admission control",
    version,
    after_help = "Logs are written to: ~/.local/share/workgate/logs/workgate.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the effective configuration
    Config {
        /// Output format (yaml or json)
        #[arg(short, long, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Run a synthetic workload through one scheduler and report outcomes
    Simulate {
        /// Number of tasks to submit
        #[arg(short, long, default_value = "20")]
        tasks: usize,

        /// Shortest task duration in milliseconds
        #[arg(long, default_value = "10")]
        min_ms: u64,

        /// Longest task duration in milliseconds
        #[arg(long, default_value = "100")]
        max_ms: u64,

        /// Probability that a task fails (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        fail_rate: f64,

        /// Clear the queue this many milliseconds after submitting
        #[arg(long)]
        clear_after_ms: Option<u64>,

        /// Override max concurrent tasks
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Override max admissions per rate window
        #[arg(long)]
        max_requests: Option<usize>,

        /// Override the rate window width in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,

        /// Output format (text or json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("workgate")
        .join("logs")
        .join("workgate.log")
}

/// Output format for config/simulate commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(format!("Unknown format: {}. Use: text, json, or yaml", s)),
        }
    }
}
