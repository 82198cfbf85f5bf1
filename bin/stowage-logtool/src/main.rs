//! Stowage log tool
//!
//! Opens a segmented log directly (no server) to append records, read them
//! back and inspect segments.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use stowage_common::Config;
use stowage_store::{Log, ReadOptionsVersion};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stowage-logtool")]
#[command(about = "Stowage segmented log tool")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/stowage/store.toml")]
    config: PathBuf,

    /// Directory holding the segment files (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Append a file to the log as one record
    Append {
        /// File holding the record bytes
        file: PathBuf,
        /// Record key
        #[arg(long)]
        key: String,
        /// Expiration time in milliseconds since the epoch
        #[arg(long)]
        expires_at_ms: Option<i64>,
        /// Write a read descriptor for the new record here
        #[arg(long)]
        descriptor: Option<PathBuf>,
        /// Write the descriptor in the legacy V0 layout
        #[arg(long, requires = "descriptor")]
        legacy: bool,
    },
    /// Copy one record to stdout
    Read {
        /// Segment name, e.g. `0_0_log` or `log_current`
        #[arg(long)]
        segment: String,
        /// Byte offset of the record within the segment
        #[arg(long)]
        offset: u64,
        /// Record size in bytes
        #[arg(long)]
        size: u64,
        /// Record key
        #[arg(long)]
        key: String,
    },
    /// Copy the records named by descriptor files to stdout, in disk order
    Fetch {
        /// Descriptor files written by `append --descriptor`
        #[arg(required = true)]
        descriptors: Vec<PathBuf>,
    },
    /// List segments and their usage
    Segments,
}

/// Load the config file, falling back to defaults when it does not exist
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // CLI takes precedence over the config file
    let mut config = load_config(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.store.data_dir = data_dir;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    // Diagnostics go to stderr so record bytes on stdout stay clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Config file: {}", args.config.display());
    info!("Data directory: {}", config.store.data_dir.display());

    let log = Log::from_config(&config.store)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let outcome = match args.command {
        Commands::Append {
            file,
            key,
            expires_at_ms,
            descriptor,
            legacy,
        } => {
            let version = if legacy {
                ReadOptionsVersion::V0
            } else {
                ReadOptionsVersion::CURRENT
            };
            commands::append(
                &log,
                &file,
                &key,
                expires_at_ms,
                descriptor.as_deref().map(|p| (p, version)),
                &mut out,
            )
        }
        Commands::Read {
            segment,
            offset,
            size,
            key,
        } => commands::read(&log, &segment, offset, size, &key, &mut out),
        Commands::Fetch { descriptors } => commands::fetch(&log, &descriptors, &mut out),
        Commands::Segments => commands::segments(&log, &mut out),
    };

    log.close()?;
    outcome
}
