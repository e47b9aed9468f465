//! The Windows PE checksum algorithm.
//!
//! The file is folded as a sequence of little-endian 32-bit words into a
//! one's-complement style sum, skipping the 4-byte `CheckSum` field itself.
//! After the word loop the low and high 16 bits are folded twice, the result
//! is masked to 16 bits and the file length is added. This matches the
//! algorithm `imagehlp!CheckSumMappedFile` implements; drivers and system
//! DLLs must carry a valid value, everything else commonly stores zero.

use serde::Serialize;

use crate::{Image, Patcher, Result};

/// Outcome of verifying a stored checksum against a recomputed one.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChecksumInfo {
    /// Value stored in the optional header
    pub stored: u32,
    /// Value recomputed over the current file contents
    pub computed: u32,
    /// Whether the stored value is acceptable
    pub valid: bool,
}

/// Compute the PE checksum of `data`, skipping the 4-byte word at
/// `skip_offset` (the `CheckSum` field). Pass `None` to fold the entire
/// buffer, e.g. for raw fragments in tests.
///
/// A trailing partial word is zero-padded on the right before accumulation.
#[must_use]
pub fn compute_checksum(data: &[u8], skip_offset: Option<usize>) -> u32 {
    let mut checksum: u64 = 0;

    let mut offset = 0;
    while offset < data.len() {
        if Some(offset) != skip_offset {
            let remaining = data.len() - offset;
            let dword = if remaining >= 4 {
                u32::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ])
            } else {
                let mut word = [0u8; 4];
                word[..remaining].copy_from_slice(&data[offset..]);
                u32::from_le_bytes(word)
            };

            checksum += u64::from(dword);
            checksum = (checksum & 0xFFFF_FFFF) + (checksum >> 32);
        }

        offset += 4;
    }

    checksum = (checksum & 0xFFFF) + (checksum >> 16);
    checksum += checksum >> 16;
    checksum &= 0xFFFF;

    checksum += data.len() as u64;

    #[allow(clippy::cast_possible_truncation)]
    {
        checksum as u32
    }
}

/// Verify the stored checksum of a parsed image.
///
/// A stored value of zero means the file is unchecksummed, which is reported
/// as trivially valid with `computed` left at zero.
#[must_use]
pub fn verify_checksum(image: &Image, data: &[u8]) -> ChecksumInfo {
    let stored = image.optional.checksum();
    if stored == 0 {
        return ChecksumInfo {
            stored: 0,
            computed: 0,
            valid: true,
        };
    }

    let computed = compute_checksum(data, Some(image.checksum_offset()));
    ChecksumInfo {
        stored,
        computed,
        valid: stored == computed,
    }
}

impl Patcher {
    /// Recompute the PE checksum over the current buffer contents and write
    /// it into the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the image is too short to
    /// hold the checksum field (cannot happen for a successfully parsed
    /// image).
    pub fn update_checksum(&mut self) -> Result<()> {
        let offset = self.image().checksum_offset();
        let checksum = compute_checksum(self.buffer().data(), Some(offset));
        self.buffer_mut().write_le::<u32>(offset, checksum)?;
        self.reload()
    }
}
