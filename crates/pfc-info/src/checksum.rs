//! 16-byte bitmap digest.
//!
//! BLAKE3 extended output truncated to [`DIGEST_LEN`] bytes. The hasher is
//! created on first use and reset for every following digest.

/// Digest length stored in the sidecar.
pub const DIGEST_LEN: usize = 16;

pub type Digest = [u8; DIGEST_LEN];

#[derive(Default)]
pub struct ChecksumUnit {
    hasher: Option<blake3::Hasher>,
}

impl ChecksumUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest `bytes`, reusing the hasher from previous calls.
    pub fn digest(&mut self, bytes: &[u8]) -> Digest {
        let hasher = self.hasher.get_or_insert_with(blake3::Hasher::new);
        hasher.reset();
        hasher.update(bytes);

        let mut out = [0u8; DIGEST_LEN];
        hasher.finalize_xof().fill(&mut out);
        out
    }

    /// Recompute over `bytes` and compare against `stored`.
    ///
    /// Returns the computed digest on mismatch.
    pub fn verify(&mut self, bytes: &[u8], stored: &Digest) -> Result<(), Digest> {
        let actual = self.digest(bytes);
        if actual == *stored {
            Ok(())
        } else {
            Err(actual)
        }
    }
}

impl std::fmt::Debug for ChecksumUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumUnit")
            .field("initialized", &self.hasher.is_some())
            .finish()
    }
}

impl Clone for ChecksumUnit {
    // Hasher state is scratch space; a clone starts uninitialized.
    fn clone(&self) -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_matches_fresh_unit() {
        let mut reused = ChecksumUnit::new();
        let _ = reused.digest(b"something else entirely");
        let a = reused.digest(&[0xff, 0x01, 0x80]);

        let b = ChecksumUnit::new().digest(&[0xff, 0x01, 0x80]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_is_blake3_prefix() {
        let mut unit = ChecksumUnit::new();
        let d = unit.digest(b"bitmap");
        assert_eq!(&d[..], &blake3::hash(b"bitmap").as_bytes()[..DIGEST_LEN]);
    }

    #[test]
    fn test_verify_detects_single_bit_change() {
        let mut unit = ChecksumUnit::new();
        let stored = unit.digest(&[0b1010_1010; 4]);
        assert!(unit.verify(&[0b1010_1010; 4], &stored).is_ok());
        let flipped = [0b1010_1010, 0b1010_1011, 0b1010_1010, 0b1010_1010];
        assert!(unit.verify(&flipped, &stored).is_err());
    }
}
