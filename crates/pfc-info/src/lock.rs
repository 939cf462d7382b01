//! Locked descriptor writes.
//!
//! A checkpoint takes the handle's advisory exclusive lock without waiting,
//! writes the descriptor, trims whatever a longer previous descriptor left
//! behind, and releases the lock when the guard drops. The guard covers
//! every exit path, including a write that fails halfway.

use tracing::{error, warn};

use crate::codec;
use crate::descriptor::CacheDescriptor;
use crate::handle::BackingHandle;
use crate::{InfoError, Result};

/// Held exclusive lock on a backing handle. Released on drop.
pub struct ExclusiveLock<'a, H: BackingHandle + ?Sized> {
    handle: &'a H,
    label: &'a str,
}

impl<'a, H: BackingHandle + ?Sized> ExclusiveLock<'a, H> {
    /// Take the lock or fail with [`InfoError::LockContention`] at once.
    pub fn try_acquire(handle: &'a H, label: &'a str) -> Result<Self> {
        match handle.try_lock_exclusive() {
            Ok(true) => Ok(Self { handle, label }),
            Ok(false) => {
                warn!(label, "descriptor lock held by another writer");
                Err(InfoError::LockContention)
            }
            Err(e) => {
                error!(label, error = %e, "descriptor lock failed");
                Err(InfoError::Io(e))
            }
        }
    }
}

impl<H: BackingHandle + ?Sized> Drop for ExclusiveLock<'_, H> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.unlock() {
            error!(label = self.label, error = %e, "descriptor unlock failed");
        }
    }
}

/// Write `descriptor` to `handle` and trim it to the encoded length, all
/// while holding the exclusive lock.
pub fn write_locked<H: BackingHandle + ?Sized>(
    handle: &H,
    descriptor: &mut CacheDescriptor,
    label: &str,
) -> Result<()> {
    let _lock = ExclusiveLock::try_acquire(handle, label)?;
    codec::write(handle, descriptor, label)?;
    handle.set_len(codec::encoded_len(descriptor)).map_err(|e| {
        warn!(label, error = %e, "descriptor trim failed");
        InfoError::Io(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorOptions;
    use crate::testing::MemoryHandle;

    fn descriptor() -> CacheDescriptor {
        let mut d = CacheDescriptor::new(DescriptorOptions::default());
        d.set_geometry(1024, 10 * 1024 + 1).unwrap();
        d
    }

    #[test]
    fn test_lock_released_after_success() {
        let handle = MemoryHandle::new();
        let mut d = descriptor();
        write_locked(&handle, &mut d, "ok").unwrap();
        assert!(!handle.is_locked());
        assert_eq!(handle.lock_attempts(), 1);
    }

    #[test]
    fn test_lock_released_after_failed_checksum_write() {
        let mut d = descriptor();
        let checksum_offset = codec::checksum_offset(d.synced_bitmap().as_bytes().len());
        let handle = MemoryHandle::new();
        handle.fail_write_at(checksum_offset);

        let err = write_locked(&handle, &mut d, "fail").unwrap_err();
        assert!(matches!(err, InfoError::ShortWrite { field: "checksum", .. }));
        assert!(!handle.is_locked());

        // next checkpoint goes through
        handle.clear_faults();
        write_locked(&handle, &mut d, "retry").unwrap();
        assert!(!handle.is_locked());
    }

    #[test]
    fn test_shorter_descriptor_trimmed_under_lock() {
        let handle = MemoryHandle::from_bytes(vec![0xaa; 4096]);
        let mut d = descriptor();
        write_locked(&handle, &mut d, "trim").unwrap();

        assert_eq!(handle.bytes().len() as u64, codec::encoded_len(&d));
        assert!(!handle.resized_without_lock());
        assert!(!handle.is_locked());
        assert!(codec::read(&handle, "trim", DescriptorOptions::default()).is_ok());
    }

    #[test]
    fn test_contention_fails_without_writing() {
        let handle = MemoryHandle::new();
        handle.hold_external_lock(true);
        let mut d = descriptor();

        let err = write_locked(&handle, &mut d, "busy").unwrap_err();
        assert!(matches!(err, InfoError::LockContention));
        assert!(handle.bytes().is_empty());

        handle.hold_external_lock(false);
        write_locked(&handle, &mut d, "free").unwrap();
        assert!(!handle.bytes().is_empty());
    }
}
