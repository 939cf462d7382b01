//! Descriptor persistence against real sidecar files.

use std::fs::{self, File, OpenOptions};

use fs2::FileExt;
use pfc_info::testing::LegacyImage;
use pfc_info::{
    info_path_for, CacheDescriptor, DescriptorOptions, FormatVersion, InfoError, IoStats,
    OpenOutcome, INFO_EXTENSION,
};
use tempfile::TempDir;

fn open_rw(path: &std::path::Path) -> File {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .unwrap()
}

#[test]
fn test_checkpoint_and_reopen() {
    let temp = TempDir::new().unwrap();
    let cinfo = info_path_for(temp.path().join("data.bin"), INFO_EXTENSION);
    let options = DescriptorOptions {
        prefetch: true,
        ..DescriptorOptions::default()
    };

    // First open: nothing on disk yet
    let file = open_rw(&cinfo);
    let (mut d, outcome) = CacheDescriptor::open(&file, "data.bin", options, 64 * 1024, 1_000_000).unwrap();
    assert!(matches!(outcome, OpenOutcome::Fresh(_)));
    assert_eq!(d.block_count(), 16);

    d.on_attach_at(1_700_000_000);
    for block in 0..16 {
        d.set_written(block);
    }
    d.set_prefetched(15);
    d.on_detach_at(
        IoStats {
            bytes_from_disk: 10,
            bytes_from_ram: 20,
            bytes_missed_remote: 1_000_000,
        },
        1_700_000_060,
    );
    d.sync_from_working();
    d.write_locked(&file, "data.bin").unwrap();
    drop(file);

    // Second open: everything comes back, prefetch marks do not
    let file = open_rw(&cinfo);
    let (loaded, outcome) = CacheDescriptor::open(&file, "data.bin", options, 1, 1).unwrap();
    assert!(outcome.is_loaded());
    assert!(loaded.is_complete());
    assert_eq!(loaded.downloaded_bytes(), 1_000_000);
    assert_eq!(loaded.access_count(), 1);
    assert_eq!(loaded.latest_detach_time(), Some(1_700_000_060));
    assert_eq!(loaded.prefetch_bitmap().map(|p| p.count_set()), Some(0));
    assert_eq!(loaded.creation_time(), d.creation_time());
}

#[test]
fn test_lock_contention_between_handles() {
    let temp = TempDir::new().unwrap();
    let cinfo = temp.path().join("busy.cinfo");
    let writer = open_rw(&cinfo);
    let other = open_rw(&cinfo);

    let mut d = CacheDescriptor::with_geometry(DescriptorOptions::default(), 4096, 8192).unwrap();

    other.try_lock_exclusive().unwrap();
    let err = d.write_locked(&writer, "busy").unwrap_err();
    assert!(matches!(err, InfoError::LockContention));
    assert_eq!(fs::metadata(&cinfo).unwrap().len(), 0);

    FileExt::unlock(&other).unwrap();
    d.write_locked(&writer, "busy").unwrap();

    // the writer released its lock
    other.try_lock_exclusive().unwrap();
    FileExt::unlock(&other).unwrap();
}

#[test]
fn test_corrupted_bitmap_falls_back_to_fresh() {
    let temp = TempDir::new().unwrap();
    let cinfo = temp.path().join("corrupt.cinfo");

    let file = open_rw(&cinfo);
    let mut d = CacheDescriptor::with_geometry(DescriptorOptions::default(), 100, 1000).unwrap();
    d.set_synced(2);
    d.on_attach_at(5);
    d.write_locked(&file, "corrupt").unwrap();
    drop(file);

    let mut bytes = fs::read(&cinfo).unwrap();
    bytes[20] ^= 0x80;
    fs::write(&cinfo, &bytes).unwrap();

    let file = open_rw(&cinfo);
    let (fresh, outcome) =
        CacheDescriptor::open(&file, "corrupt", DescriptorOptions::default(), 100, 1000).unwrap();
    assert!(matches!(outcome, OpenOutcome::Fresh(InfoError::ChecksumMismatch { .. })));
    assert_eq!(fresh.access_count(), 0);
    assert_eq!(fresh.downloaded_blocks(), 0);
}

#[test]
fn test_legacy_sidecar_upgraded_on_checkpoint() {
    let temp = TempDir::new().unwrap();
    let cinfo = temp.path().join("old.cinfo");
    let image = LegacyImage::new(1024, 4096)
        .with_bitmap(vec![0x0f])
        .with_record(100, 1, 2, 3)
        .with_record(200, 4, 5, 6);
    fs::write(&cinfo, image.encode()).unwrap();

    let file = open_rw(&cinfo);
    let mut d = CacheDescriptor::read(&file, "old", DescriptorOptions::default()).unwrap();
    assert_eq!(d.format(), FormatVersion::Legacy);
    assert!(d.is_complete());
    assert_eq!(d.creation_time(), 100);

    d.on_attach_at(300);
    d.write_locked(&file, "old").unwrap();

    let again = CacheDescriptor::read(&file, "old", DescriptorOptions::default()).unwrap();
    assert_eq!(again.format(), FormatVersion::Current);
    assert_eq!(again.access_count(), 3);
    let attach: Vec<_> = again.history().records().map(|r| r.attach_time).collect();
    assert_eq!(attach, vec![100, 200, 300]);
}
