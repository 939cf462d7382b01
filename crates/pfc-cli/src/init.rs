//! `pfc init`: write a fresh descriptor under lock.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use pfc_config::{log_cli_info, Config};
use pfc_info::CacheDescriptor;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Descriptor path to create (overwritten if present)
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Size of the cached data file in bytes
    #[arg(long)]
    file_size: u64,

    /// Block size in bytes (defaults to the configured block size)
    #[arg(long)]
    block_size: Option<u64>,

    /// Mark every block as present
    #[arg(long)]
    complete: bool,

    /// Disable download-status tracking for this entry
    #[arg(long)]
    no_download_status: bool,
}

pub fn run(config: &Config, args: InitArgs) -> Result<()> {
    let block_size = args.block_size.unwrap_or(config.cache.block_size);
    let mut d = CacheDescriptor::with_geometry(
        config.cache.descriptor_options(),
        block_size,
        args.file_size,
    )
    .context("Invalid descriptor geometry")?;

    if args.complete {
        for block in 0..d.block_count() {
            d.set_written(block);
        }
        d.sync_from_working();
        d.update_complete_status();
    }
    if args.no_download_status {
        d.disable_download_status();
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&args.path)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;

    let label = args.path.display().to_string();
    d.write_locked(&file, &label)
        .with_context(|| format!("Failed to write descriptor {}", args.path.display()))?;

    log_cli_info!(
        "Descriptor written",
        path = label.as_str(),
        blocks = d.block_count()
    );
    println!(
        "Created {} ({} blocks of {} bytes)",
        args.path.display(),
        d.block_count(),
        d.block_size()
    );
    Ok(())
}
