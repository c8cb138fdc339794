//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// eventgate - keyed event fan-out with status-gated consumers
#[derive(Parser, Debug)]
#[command(
    name = "eventgate",
    author,
    version,
    about = "Keyed event fan-out engine with status-gated consumers",
    long_about = "Fans keyed events from a source out to many consumers.\n\n\
                  Each consumer only receives the event keys its current status \n\
                  enables. Duplicate publishes inside a time window are suppressed."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "EVENTGATE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "EVENTGATE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the demo pipeline against simulated clients
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "eventgate.toml", env = "EVENTGATE_CONFIG")]
    pub config: PathBuf,

    /// Stop after this many events were fanned out (0 = unlimited)
    #[arg(long, default_value = "0", env = "EVENTGATE_MAX_EVENTS")]
    pub max_events: u64,

    /// Pipeline timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "EVENTGATE_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running pipeline
    #[arg(long)]
    pub dry_run: bool,

    /// Override the dedup window from configuration (milliseconds)
    #[arg(long, env = "EVENTGATE_DEDUP_WINDOW_MS")]
    pub window_ms: Option<u64>,

    /// Override the worker count from configuration
    #[arg(long, env = "EVENTGATE_WORKERS")]
    pub workers: Option<usize>,

    /// Metrics sampling interval in milliseconds
    #[arg(long, default_value = "1000", env = "EVENTGATE_SAMPLE_INTERVAL_MS")]
    pub sample_interval_ms: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "EVENTGATE_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "eventgate.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "eventgate.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show status tables and scripts for every consumer
    #[arg(long)]
    pub consumers: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_defaults() {
        let cli = Cli::try_parse_from(["eventgate", "run", "--config", "demo.toml"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("demo.toml"));
                assert_eq!(args.max_events, 0);
                assert_eq!(args.sample_interval_ms, 1000);
                assert!(args.window_ms.is_none());
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["eventgate", "-q", "-v", "info"]);
        assert!(result.is_err());
    }
}
