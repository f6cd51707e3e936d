//! Flowcast - flow record distribution server
//!
//! # Usage
//!
//! ```bash
//! # Run the server (default)
//! flowcast
//! flowcast --config configs/flowcast.toml
//!
//! # Replay a captured record file into the data channel
//! flowcast serve --replay capture.bin
//!
//! # Print the records in a native record file
//! flowcast read capture.bin
//! ```

mod cmd;

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcast_config::{LogConfig, LogFormat, LogOutput};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Flowcast - flow record distribution server
#[derive(Parser, Debug)]
#[command(name = "flowcast")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true, env = "FLOWCAST_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server
    Serve(cmd::serve::ServeArgs),

    /// Print the records in a native record file
    Read(cmd::read::ReadArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Serve(mut args)) => {
            // CLI global --config overrides subcommand config if both specified
            if args.config.is_none() && cli.config.is_some() {
                args.config = cli.config;
            }
            let loaded = cmd::serve::load_config(args.config.as_deref())?;
            let level = resolve_log_level(cli.log_level.as_deref(), &loaded.config.log);
            init_logging(&level, &loaded.config.log)?;
            cmd::serve::run(args, loaded).await
        }
        Some(Command::Read(args)) => {
            // Read doesn't need logging - just outputs to stdout
            cmd::read::run(args).await
        }
        // No subcommand = run server (default behavior)
        None => {
            let args = cmd::serve::ServeArgs {
                config: cli.config,
                replay: None,
            };
            let loaded = cmd::serve::load_config(args.config.as_deref())?;
            let level = resolve_log_level(cli.log_level.as_deref(), &loaded.config.log);
            init_logging(&level, &loaded.config.log)?;
            cmd::serve::run(args, loaded).await
        }
    }
}

/// Resolve log level: CLI flag > config file > default "info"
fn resolve_log_level(cli_level: Option<&str>, log: &LogConfig) -> String {
    match cli_level {
        Some(level) => level.to_string(),
        None => log.level.as_str().to_string(),
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(log.filter_directives(level))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let (writer, ansi) = match &log.output {
        LogOutput::Stdout => (BoxMakeWriter::new(io::stdout), true),
        LogOutput::Stderr => (BoxMakeWriter::new(io::stderr), true),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    match log.format {
        LogFormat::Console => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(writer),
            )
            .with(filter)
            .init(),
    }

    Ok(())
}
