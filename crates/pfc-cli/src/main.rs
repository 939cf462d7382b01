//! # pfc CLI
//!
//! Inspect, verify and seed cache descriptor (`.cinfo`) sidecars.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use pfc_config::logging::init_logging;

mod init;
mod inspect;

/// pfc - proxy file cache descriptor tool
#[derive(Parser)]
#[command(name = "pfc")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the contents of a descriptor
    Inspect(inspect::InspectArgs),

    /// Check that a descriptor parses and its bitmap checksum matches
    Verify {
        /// Descriptor, or the data file it belongs to
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Write a fresh descriptor
    Init(init::InitArgs),

    /// Print configuration as TOML
    Config {
        /// Show the loaded configuration instead of the defaults
        #[arg(long)]
        effective: bool,
    },
}

fn main() -> Result<()> {
    let config = pfc_config::config().clone();
    init_logging(config.logging.log_level());

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect(args) => inspect::run(&config, args),
        Commands::Verify { path } => inspect::verify(&config, &path),
        Commands::Init(args) => init::run(&config, args),
        Commands::Config { effective } => {
            let rendered = if effective {
                config.to_toml()?
            } else {
                pfc_config::Config::default_toml()?
            };
            print!("{}", rendered);
            Ok(())
        }
    }
}

/// Accept either a descriptor path or the data file it describes.
pub(crate) fn resolve_info_path(path: &Path, extension: &str) -> PathBuf {
    if path.as_os_str().to_string_lossy().ends_with(extension) {
        return path.to_path_buf();
    }
    let sidecar = pfc_info::info_path_for(path, extension);
    if sidecar.exists() {
        sidecar
    } else {
        path.to_path_buf()
    }
}
