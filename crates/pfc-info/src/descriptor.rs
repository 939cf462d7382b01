//! The in-memory cache descriptor.
//!
//! One descriptor describes one locally cached file: its block geometry,
//! which blocks are present (synced/working/prefetch bitmaps), the bitmap
//! checksum and the recent access history. It is read once when the cache
//! entry opens, mutated in memory while the file is in use and written back
//! under lock at checkpoints.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::bitmap::{self, BlockBitmap, BlockBitmaps};
use crate::checksum::{ChecksumUnit, Digest, DIGEST_LEN};
use crate::handle::BackingHandle;
use crate::history::{AccessHistory, IoStats, Timestamp};
use crate::{codec, lock, InfoError, Result};

/// Default cap on the bitmap size accepted from a stored header (64 MiB).
pub const DEFAULT_MAX_BITMAP_BYTES: usize = 64 * 1024 * 1024;

/// On-disk layout family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// v1: no checksum, no attach times, all records stored
    Legacy,
    /// v2: checksummed bitmap, creation time, at most three records
    Current,
}

impl FormatVersion {
    pub fn number(self) -> i32 {
        match self {
            FormatVersion::Legacy => 1,
            FormatVersion::Current => 2,
        }
    }
}

/// The signed version field: magnitude is the format, a negative sign
/// means download-status tracking is disabled for the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTag {
    pub format: FormatVersion,
    pub download_status_disabled: bool,
}

impl VersionTag {
    pub fn from_wire(raw: i32) -> Result<Self> {
        let format = match raw.unsigned_abs() {
            0 => return Err(InfoError::UnsupportedVersion(raw)),
            1 => FormatVersion::Legacy,
            _ => FormatVersion::Current,
        };
        Ok(Self {
            format,
            download_status_disabled: raw < 0,
        })
    }

    pub fn to_wire(self) -> i32 {
        let n = self.format.number();
        if self.download_status_disabled {
            -n
        } else {
            n
        }
    }
}

/// Per-entry settings that are not part of the stored format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorOptions {
    /// Keep a prefetch bitmap alongside the working one
    pub prefetch: bool,
    /// Largest bitmap a stored header may ask for
    pub max_bitmap_bytes: usize,
}

impl Default for DescriptorOptions {
    fn default() -> Self {
        Self {
            prefetch: false,
            max_bitmap_bytes: DEFAULT_MAX_BITMAP_BYTES,
        }
    }
}

/// How [`CacheDescriptor::open`] came by its descriptor.
#[derive(Debug)]
pub enum OpenOutcome {
    /// Parsed and verified from the backing handle
    Loaded,
    /// Nothing usable was stored; started from scratch
    Fresh(InfoError),
}

impl OpenOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, OpenOutcome::Loaded)
    }
}

/// Current wall-clock time as stored in descriptors.
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct CacheDescriptor {
    pub(crate) format: FormatVersion,
    pub(crate) download_status_disabled: bool,
    pub(crate) block_size: u64,
    pub(crate) file_size: u64,
    pub(crate) creation_time: Timestamp,
    pub(crate) bitmaps: BlockBitmaps,
    pub(crate) checksum: Digest,
    pub(crate) checksum_unit: ChecksumUnit,
    pub(crate) history: AccessHistory,
    pub(crate) complete: bool,
    pub(crate) options: DescriptorOptions,
}

impl CacheDescriptor {
    /// Empty descriptor with no geometry yet.
    pub fn new(options: DescriptorOptions) -> Self {
        Self {
            format: FormatVersion::Current,
            download_status_disabled: false,
            block_size: 0,
            file_size: 0,
            creation_time: 0,
            bitmaps: BlockBitmaps::new(options.prefetch),
            checksum: [0u8; DIGEST_LEN],
            checksum_unit: ChecksumUnit::new(),
            history: AccessHistory::new(),
            complete: false,
            options,
        }
    }

    /// Fresh descriptor for a file of `file_size` bytes in `block_size` blocks.
    pub fn with_geometry(options: DescriptorOptions, block_size: u64, file_size: u64) -> Result<Self> {
        let mut d = Self::new(options);
        d.set_geometry(block_size, file_size)?;
        Ok(d)
    }

    /// Establish block and file size, allocating zeroed bitmaps and stamping
    /// the creation time.
    ///
    /// Geometry is set once per descriptor; later calls are refused and
    /// leave the tracked state untouched.
    pub fn set_geometry(&mut self, block_size: u64, file_size: u64) -> Result<()> {
        if self.has_geometry() {
            warn!(
                block_size = self.block_size,
                file_size = self.file_size,
                "geometry already established, ignoring resize"
            );
            return Ok(());
        }
        match (i64::try_from(block_size), i64::try_from(file_size)) {
            (Ok(block_size), Ok(file_size)) => self.init_geometry(block_size, file_size),
            _ => Err(InfoError::InvalidGeometry {
                block_size: block_size.into(),
                file_size: file_size.into(),
            }),
        }
    }

    /// Validate raw (possibly stored) geometry and allocate bitmaps.
    pub(crate) fn init_geometry(&mut self, block_size: i64, file_size: i64) -> Result<()> {
        let invalid = InfoError::InvalidGeometry {
            block_size: block_size.into(),
            file_size: file_size.into(),
        };
        if block_size < 1 || file_size < 1 {
            return Err(invalid);
        }
        let blocks = bitmap::block_count(file_size as u64, block_size as u64);
        if bitmap::bytes_for_blocks(blocks) > self.options.max_bitmap_bytes {
            return Err(invalid);
        }

        self.block_size = block_size as u64;
        self.file_size = file_size as u64;
        self.bitmaps.resize(blocks);
        self.creation_time = unix_now();
        self.complete = false;
        Ok(())
    }

    pub fn has_geometry(&self) -> bool {
        self.block_size > 0
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Parse a descriptor from `handle`.
    pub fn read<H: BackingHandle + ?Sized>(
        handle: &H,
        label: &str,
        options: DescriptorOptions,
    ) -> Result<Self> {
        codec::read(handle, label, options)
    }

    /// Checkpoint to `handle` under its exclusive lock.
    pub fn write_locked<H: BackingHandle + ?Sized>(&mut self, handle: &H, label: &str) -> Result<()> {
        lock::write_locked(handle, self, label)
    }

    /// Load the stored descriptor, or start fresh with the given geometry
    /// when nothing usable is stored.
    pub fn open<H: BackingHandle + ?Sized>(
        handle: &H,
        label: &str,
        options: DescriptorOptions,
        block_size: u64,
        file_size: u64,
    ) -> Result<(Self, OpenOutcome)> {
        match codec::read(handle, label, options) {
            Ok(d) => {
                debug!(label, complete = d.complete, access_count = d.access_count(), "descriptor loaded");
                Ok((d, OpenOutcome::Loaded))
            }
            Err(e) => {
                debug!(label, reason = %e, "starting fresh descriptor");
                let d = Self::with_geometry(options, block_size, file_size)?;
                Ok((d, OpenOutcome::Fresh(e)))
            }
        }
    }

    // ------------------------------------------------------------------
    // Header fields
    // ------------------------------------------------------------------

    /// Layout the descriptor was read from (or `Current` if built in memory).
    pub fn format(&self) -> FormatVersion {
        self.format
    }

    /// Version field as it will be written.
    pub fn version_tag(&self) -> VersionTag {
        VersionTag {
            format: FormatVersion::Current,
            download_status_disabled: self.download_status_disabled,
        }
    }

    pub fn disable_download_status(&mut self) {
        self.download_status_disabled = true;
    }

    pub fn is_download_status_disabled(&self) -> bool {
        self.download_status_disabled
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn block_count(&self) -> u64 {
        self.bitmaps.synced().len()
    }

    pub fn creation_time(&self) -> Timestamp {
        self.creation_time
    }

    /// Digest stored with (or last written for) the synced bitmap.
    pub fn checksum(&self) -> &Digest {
        &self.checksum
    }

    pub fn options(&self) -> DescriptorOptions {
        self.options
    }

    // ------------------------------------------------------------------
    // Bitmaps
    // ------------------------------------------------------------------

    pub fn synced_bitmap(&self) -> &BlockBitmap {
        self.bitmaps.synced()
    }

    pub fn working_bitmap(&self) -> &BlockBitmap {
        self.bitmaps.working()
    }

    pub fn prefetch_bitmap(&self) -> Option<&BlockBitmap> {
        self.bitmaps.prefetch()
    }

    /// A block finished writing to the local copy.
    pub fn set_written(&mut self, block: u64) {
        self.bitmaps.working_mut().set(block);
    }

    pub fn test_written(&self, block: u64) -> bool {
        self.bitmaps.working().test(block)
    }

    /// A block's data is known to be durable; it will be persisted as present.
    pub fn set_synced(&mut self, block: u64) {
        self.bitmaps.synced_mut().set(block);
    }

    /// Promote every written block to synced.
    pub fn sync_from_working(&mut self) {
        self.bitmaps.sync_from_working();
    }

    /// A block was fetched by read-ahead. Ignored when prefetch is off.
    pub fn set_prefetched(&mut self, block: u64) {
        if let Some(p) = self.bitmaps.prefetch_mut() {
            p.set(block);
        }
    }

    pub fn test_prefetched(&self, block: u64) -> bool {
        self.bitmaps.prefetch().is_some_and(|p| p.test(block))
    }

    /// True if any block in `[lo, hi)` has not been written yet.
    pub fn any_unwritten_in_range(&self, lo: u64, hi: u64) -> bool {
        self.bitmaps.working().any_unset_in_range(lo, hi)
    }

    /// Completeness as of the last load or [`Self::update_complete_status`].
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Re-derive completeness from the working bitmap.
    pub fn update_complete_status(&mut self) -> bool {
        self.complete = !self.any_unwritten_in_range(0, self.block_count());
        self.complete
    }

    pub fn downloaded_blocks(&self) -> u64 {
        self.bitmaps.working().count_set()
    }

    /// Bytes covered by written blocks; the last block is clipped to the file.
    pub fn downloaded_bytes(&self) -> u64 {
        let blocks = self.block_count();
        if blocks == 0 {
            return 0;
        }
        let mut bytes = self.downloaded_blocks() * self.block_size;
        if self.test_written(blocks - 1) {
            bytes -= blocks * self.block_size - self.file_size;
        }
        bytes
    }

    // ------------------------------------------------------------------
    // Access history
    // ------------------------------------------------------------------

    pub fn history(&self) -> &AccessHistory {
        &self.history
    }

    pub fn access_count(&self) -> u64 {
        self.history.access_count()
    }

    pub fn on_attach(&mut self) {
        self.on_attach_at(unix_now());
    }

    pub fn on_attach_at(&mut self, now: Timestamp) {
        self.history.on_attach(now);
    }

    pub fn on_detach(&mut self, stats: IoStats) {
        self.on_detach_at(stats, unix_now());
    }

    pub fn on_detach_at(&mut self, stats: IoStats, now: Timestamp) {
        self.history.on_detach(stats, now);
    }

    pub fn latest_detach_time(&self) -> Option<Timestamp> {
        self.history.latest_detach_time()
    }
}
