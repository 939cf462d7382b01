//! # pfc-info
//!
//! Cache-state descriptors for the pfc proxy file cache.
//!
//! Every locally cached copy of a remote file has a small binary sidecar
//! (`<data file>.cinfo`) recording which fixed-size blocks are present, a
//! checksum over that block bitmap, and the last few access sessions.
//!
//! ## Lifecycle
//!
//! ```text
//! open ──► CacheDescriptor::open (read, or fresh on any failure)
//!   │
//!   ├── on_attach / set_written / set_prefetched / on_detach   (in memory)
//!   │
//!   └── checkpoint ──► sync_from_working + write_locked (non-blocking flock)
//! ```
//!
//! ## Formats
//!
//! Two layouts exist (see [`codec`]): the legacy v1 layout is migrated on
//! read, and every write emits the current v2 layout.

pub mod bitmap;
pub mod checksum;
pub mod codec;
pub mod descriptor;
mod error;
pub mod handle;
pub mod history;
pub mod lock;
pub mod testing;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use bitmap::{block_count, bytes_for_blocks, BlockBitmap, BlockBitmaps};
pub use checksum::{ChecksumUnit, Digest, DIGEST_LEN};
pub use descriptor::{
    unix_now, CacheDescriptor, DescriptorOptions, FormatVersion, OpenOutcome, VersionTag,
    DEFAULT_MAX_BITMAP_BYTES,
};
pub use error::{InfoError, Result};
pub use handle::BackingHandle;
pub use history::{AccessHistory, AccessRecord, IoStats, Timestamp, MAX_ACCESS_RECORDS};
pub use lock::{write_locked, ExclusiveLock};

/// Default suffix of descriptor sidecars.
pub const INFO_EXTENSION: &str = ".cinfo";

/// Sidecar path for a cached data file: the data path with `extension`
/// appended (`/cache/a/b.root` -> `/cache/a/b.root.cinfo`).
pub fn info_path_for<P: AsRef<Path>>(data_path: P, extension: &str) -> PathBuf {
    let mut s: OsString = data_path.as_ref().as_os_str().to_owned();
    s.push(extension);
    PathBuf::from(s)
}
