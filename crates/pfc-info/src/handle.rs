//! Backing handle abstraction.
//!
//! The codec only needs positioned reads and writes, truncation and an
//! advisory exclusive lock on the underlying file. `std::fs::File` implements this on
//! Unix; tests use [`crate::testing::MemoryHandle`].

#[cfg(unix)]
use std::fs::File;
use std::io;

/// Positioned byte store with an advisory exclusive lock.
pub trait BackingHandle {
    /// Read up to `buf.len()` bytes at `offset`. Returns the number read;
    /// fewer than requested means the store ended.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes at `offset`. Returns the number written.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Truncate or extend the store to exactly `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Try to take the exclusive lock without blocking.
    ///
    /// `Ok(false)` means another holder has it.
    fn try_lock_exclusive(&self) -> io::Result<bool>;

    fn unlock(&self) -> io::Result<()>;
}

impl<H: BackingHandle + ?Sized> BackingHandle for &H {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        (**self).write_at(buf, offset)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn try_lock_exclusive(&self) -> io::Result<bool> {
        (**self).try_lock_exclusive()
    }

    fn unlock(&self) -> io::Result<()> {
        (**self).unlock()
    }
}

#[cfg(unix)]
impl BackingHandle for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;

        let mut done = 0;
        while done < buf.len() {
            match FileExt::read_at(self, &mut buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;

        let mut done = 0;
        while done < buf.len() {
            match FileExt::write_at(self, &buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn try_lock_exclusive(&self) -> io::Result<bool> {
        match fs2::FileExt::try_lock_exclusive(self) {
            Ok(()) => Ok(true),
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn unlock(&self) -> io::Result<()> {
        fs2::FileExt::unlock(self)
    }
}

#[cfg(unix)]
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
