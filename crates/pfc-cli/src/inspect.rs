//! `pfc inspect` and `pfc verify`.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::Args;
use pfc_config::{log_cli_debug, Config};
use pfc_info::{AccessRecord, CacheDescriptor, Timestamp};
use serde::Serialize;

use crate::resolve_info_path;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Descriptor, or the data file it belongs to
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,

    /// Print the per-block map of the synced bitmap
    #[arg(long)]
    blocks: bool,
}

#[derive(Debug, Serialize)]
pub struct DescriptorSummary {
    pub path: PathBuf,
    pub format_version: i32,
    pub download_status_disabled: bool,
    pub block_size: u64,
    pub file_size: u64,
    pub block_count: u64,
    pub synced_blocks: u64,
    pub downloaded_bytes: u64,
    pub complete: bool,
    pub created: String,
    pub checksum: String,
    pub access_count: u64,
    pub accesses: Vec<AccessSummary>,
}

#[derive(Debug, Serialize)]
pub struct AccessSummary {
    pub attached: String,
    pub detached: String,
    pub duration_secs: i64,
    #[serde(flatten)]
    pub record: AccessRecord,
}

fn format_time(t: Timestamp) -> String {
    DateTime::from_timestamp(t, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| t.to_string())
}

impl DescriptorSummary {
    pub fn new(path: &Path, d: &CacheDescriptor) -> Self {
        Self {
            path: path.to_path_buf(),
            format_version: d.format().number(),
            download_status_disabled: d.is_download_status_disabled(),
            block_size: d.block_size(),
            file_size: d.file_size(),
            block_count: d.block_count(),
            synced_blocks: d.synced_bitmap().count_set(),
            downloaded_bytes: d.downloaded_bytes(),
            complete: d.is_complete(),
            created: format_time(d.creation_time()),
            checksum: hex::encode(d.checksum()),
            access_count: d.access_count(),
            accesses: d
                .history()
                .records()
                .map(|r| AccessSummary {
                    attached: format_time(r.attach_time),
                    detached: format_time(r.detach_time),
                    duration_secs: r.detach_time - r.attach_time,
                    record: *r,
                })
                .collect(),
        }
    }

    fn print_text(&self) {
        println!("  Descriptor: {}", self.path.display());
        println!("  ========================================");
        let disabled = if self.download_status_disabled {
            " (download status disabled)"
        } else {
            ""
        };
        println!("    Format:      v{}{}", self.format_version, disabled);
        println!("    Block size:  {}", self.block_size);
        println!("    File size:   {}", self.file_size);
        println!(
            "    Blocks:      {}/{} ({} bytes){}",
            self.synced_blocks,
            self.block_count,
            self.downloaded_bytes,
            if self.complete { " complete" } else { "" }
        );
        println!("    Created:     {}", self.created);
        println!("    Checksum:    {}", self.checksum);
        println!("    Accesses:    {}", self.access_count);
        for (i, a) in self.accesses.iter().enumerate() {
            println!(
                "      [{}] {} -> {} ({}s) disk={} ram={} missed={}",
                i,
                a.attached,
                a.detached,
                a.duration_secs,
                a.record.bytes_from_disk,
                a.record.bytes_from_ram,
                a.record.bytes_missed_remote
            );
        }
    }
}

/// One character per block, 64 per line: `#` present, `.` missing.
fn block_map(d: &CacheDescriptor) -> String {
    let bitmap = d.synced_bitmap();
    let mut out = String::new();
    for i in 0..bitmap.len() {
        if i > 0 && i % 64 == 0 {
            out.push('\n');
        }
        out.push(if bitmap.test(i) { '#' } else { '.' });
    }
    out
}

fn load(config: &Config, path: &Path) -> Result<(PathBuf, CacheDescriptor)> {
    let info_path = resolve_info_path(path, &config.cache.info_extension);
    let file = File::open(&info_path)
        .with_context(|| format!("Failed to open descriptor {}", info_path.display()))?;
    let label = info_path.display().to_string();
    log_cli_debug!("Reading descriptor", path = label.as_str());

    let d = CacheDescriptor::read(&file, &label, config.cache.descriptor_options())
        .with_context(|| format!("Failed to read descriptor {}", info_path.display()))?;
    Ok((info_path, d))
}

pub fn run(config: &Config, args: InspectArgs) -> Result<()> {
    let (info_path, d) = load(config, &args.path)?;
    let summary = DescriptorSummary::new(&info_path, &d);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print_text();
        if args.blocks {
            println!();
            println!("{}", block_map(&d));
        }
    }
    Ok(())
}

pub fn verify(config: &Config, path: &Path) -> Result<()> {
    let info_path = resolve_info_path(path, &config.cache.info_extension);
    let file = File::open(&info_path)
        .with_context(|| format!("Failed to open descriptor {}", info_path.display()))?;
    let label = info_path.display().to_string();

    match CacheDescriptor::read(&file, &label, config.cache.descriptor_options()) {
        Ok(d) => {
            println!(
                "OK {} (v{}, {}/{} blocks)",
                info_path.display(),
                d.format().number(),
                d.synced_bitmap().count_set(),
                d.block_count()
            );
            Ok(())
        }
        Err(e) => anyhow::bail!("{} [{}]: {}", info_path.display(), e.kind(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfc_info::{DescriptorOptions, IoStats};

    #[test]
    fn test_summary_fields() {
        let mut d = CacheDescriptor::with_geometry(DescriptorOptions::default(), 10, 25).unwrap();
        d.set_synced(0);
        d.set_written(0);
        d.on_attach_at(0);
        d.on_detach_at(IoStats::default(), 90);

        let s = DescriptorSummary::new(Path::new("x.cinfo"), &d);
        assert_eq!(s.block_count, 3);
        assert_eq!(s.synced_blocks, 1);
        assert_eq!(s.downloaded_bytes, 10);
        assert_eq!(s.accesses.len(), 1);
        assert_eq!(s.accesses[0].duration_secs, 90);
        assert_eq!(s.accesses[0].attached, "1970-01-01T00:00:00+00:00");
        assert_eq!(s.checksum, "0".repeat(32));
    }

    #[test]
    fn test_summary_checksum_is_lowercase_hex() {
        let handle = pfc_info::testing::MemoryHandle::new();
        let mut d = CacheDescriptor::with_geometry(DescriptorOptions::default(), 1, 16).unwrap();
        d.set_synced(3);
        d.write_locked(&handle, "hex").unwrap();

        let s = DescriptorSummary::new(Path::new("x.cinfo"), &d);
        assert_eq!(s.checksum, hex::encode(d.checksum()));
        assert_eq!(s.checksum.len(), 32);
        assert!(s.checksum.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_block_map_wraps() {
        let mut d = CacheDescriptor::with_geometry(DescriptorOptions::default(), 1, 70).unwrap();
        d.set_synced(0);
        d.set_synced(65);
        let map = block_map(&d);
        let lines: Vec<_> = map.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 64);
        assert!(lines[0].starts_with("#."));
        assert_eq!(lines[1], ".#....");
    }
}
