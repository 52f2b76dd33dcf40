//! buflist CLI - validate buffer configurations and load-test them.

use anyhow::Result;
use buflist_core::config::{LogFormat, MonitoringConfig};
use buflist_core::Config;
use clap::{Parser, Subcommand};
use commands::simulate::{SimulateParams, StopReason};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (unreadable file, invalid TOML or options)
    ConfigError = 1,
    /// Buffer rejected an operation
    BufferError = 2,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Map an error to an exit code from the first buflist error in its chain.
    fn from_error(error: &anyhow::Error) -> Self {
        let core = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<buflist_core::Error>());

        match core {
            Some(buflist_core::Error::Config(_)) | Some(buflist_core::Error::Io(_)) => {
                ExitCode::ConfigError
            }
            Some(buflist_core::Error::Buffer(_)) => ExitCode::BufferError,
            None => ExitCode::RuntimeError,
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "buflist")]
#[command(about = "Concurrent batching buffer CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,

    /// Drive a buffer with synthetic producers and a simulated handler
    Simulate {
        /// Number of producer threads
        #[arg(long, default_value_t = 4)]
        producers: usize,

        /// Items submitted by each producer
        #[arg(long, default_value_t = 10_000)]
        items: u64,

        /// Fail every k-th handler call (0 never fails)
        #[arg(long, default_value_t = 0)]
        fail_every: u64,

        /// Time the handler spends on each batch
        #[arg(long, default_value_t = 0)]
        handler_delay_ms: u64,

        /// Stop after this many seconds even if producers are still running
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config when it parses; fall back to defaults
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    init_logging(&monitoring, cli.verbose);

    match execute_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

fn init_logging(monitoring: &MonitoringConfig, verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new(monitoring.log_level.as_directive()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Validate => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from("config.toml"));
            commands::validate::run(&path)?;
            Ok(ExitCode::Success)
        }

        Commands::Simulate {
            producers,
            items,
            fail_every,
            handler_delay_ms,
            duration_secs,
        } => {
            let config = load_config(&cli.config)?;
            let params = SimulateParams {
                producers,
                items,
                fail_every,
                handler_delay: Duration::from_millis(handler_delay_ms),
                duration: duration_secs.map(Duration::from_secs),
            };

            match commands::simulate::run(config, params).await? {
                StopReason::Interrupted => Ok(ExitCode::SignalInterrupt),
                StopReason::Completed | StopReason::DurationElapsed => Ok(ExitCode::Success),
            }
        }
    }
}

/// Load the config file when one was given, defaults otherwise.
fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}
