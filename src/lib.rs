mod commands;
pub mod core;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::core::config::{SyncSettings, DEFAULT_CONFIG_FILE};
use crate::core::error::SyncResult;

#[derive(Parser)]
#[command(name = "launcher-sync", version)]
#[command(about = "Keep a game installation in sync with its published manifest")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fingerprint a reference directory and write its manifest report
    Scan {
        /// Directory to scan
        dir: PathBuf,

        /// Where to write the report (default: files_report.json)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Compare the installation against the manifest without fetching
    Check {
        /// Launcher configuration file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Fetch every missing or outdated file
    Sync {
        /// Launcher configuration file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Concurrent transfers (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

pub fn run() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,launcher_sync_lib=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli.command)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` means the command ran but the installation is not in sync.
async fn dispatch(command: Command) -> SyncResult<bool> {
    match command {
        Command::Scan { dir, output } => {
            let written = commands::scan(dir, output).await?;
            println!("{}", written.display());
            Ok(true)
        }
        Command::Check { config } => {
            let settings = SyncSettings::load(&config)?;
            let summary = commands::check(&settings).await?;
            Ok(commands::print_check(&summary, settings.manifest_path()))
        }
        Command::Sync {
            config,
            concurrency,
        } => {
            let mut settings = SyncSettings::load(&config)?;
            if let Some(concurrency) = concurrency {
                settings.override_concurrency(concurrency)?;
            }
            tracing::info!("Launcher sync starting...");
            let report = commands::sync_interactive(&settings).await?;
            Ok(commands::print_report(&report))
        }
    }
}
