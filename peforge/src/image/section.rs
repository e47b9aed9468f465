//! Section headers and their characteristics bits.

use bitflags::bitflags;

use crate::{file::io::read_le_at, Result};

/// On-disk size of a section header.
pub const SECTION_HEADER_SIZE: usize = 40;

bitflags! {
    /// Section characteristics bits consumed by this crate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// The section contains executable code.
        const CNT_CODE = 0x0000_0020;
        /// The section contains initialized data.
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// The section contains uninitialized data.
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        /// The section can be executed.
        const MEM_EXECUTE = 0x2000_0000;
        /// The section can be read.
        const MEM_READ = 0x4000_0000;
        /// The section can be written to.
        const MEM_WRITE = 0x8000_0000;
    }
}

/// A single section header (40 bytes in the file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Raw 8-byte name, zero-padded, not necessarily NUL-terminated
    pub name: [u8; 8],
    pub virtual_size: u32,
    /// RVA at which the section is mapped
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    /// File offset of the section's raw data
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    /// Parse one section header at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is truncated.
    pub fn parse(data: &[u8], offset: usize) -> Result<SectionHeader> {
        let mut cursor = offset;

        let mut name = [0u8; 8];
        for byte in &mut name {
            *byte = read_le_at::<u8>(data, &mut cursor)?;
        }

        let virtual_size = read_le_at::<u32>(data, &mut cursor)?;
        let virtual_address = read_le_at::<u32>(data, &mut cursor)?;
        let size_of_raw_data = read_le_at::<u32>(data, &mut cursor)?;
        let pointer_to_raw_data = read_le_at::<u32>(data, &mut cursor)?;

        // PointerToRelocations, PointerToLinenumbers, NumberOfRelocations,
        // NumberOfLinenumbers are irrelevant for images.
        let mut cursor = offset + 36;
        let characteristics = read_le_at::<u32>(data, &mut cursor)?;

        Ok(SectionHeader {
            name,
            virtual_size,
            virtual_address,
            size_of_raw_data,
            pointer_to_raw_data,
            characteristics,
        })
    }

    /// The section name as UTF-8, trailing NULs trimmed. Falls back to
    /// `"<invalid>"` for non-UTF-8 names.
    #[must_use]
    pub fn name_str(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }

    /// The characteristics word as typed flags.
    #[must_use]
    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_retain(self.characteristics)
    }

    /// Returns `true` when `rva` falls within `[VirtualAddress,
    /// VirtualAddress + VirtualSize)`.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && u64::from(rva) < u64::from(self.virtual_address) + u64::from(self.virtual_size)
    }

    /// End of the section's raw data in the file.
    #[must_use]
    pub fn raw_end(&self) -> u64 {
        u64::from(self.pointer_to_raw_data) + u64::from(self.size_of_raw_data)
    }

    /// A `"RWX"`-style permission string, dashes for missing bits.
    #[must_use]
    pub fn permissions(&self) -> String {
        let flags = self.flags();
        let mut perms = ['-', '-', '-'];
        if flags.contains(SectionFlags::MEM_READ) {
            perms[0] = 'R';
        }
        if flags.contains(SectionFlags::MEM_WRITE) {
            perms[1] = 'W';
        }
        if flags.contains(SectionFlags::MEM_EXECUTE) {
            perms[2] = 'X';
        }
        perms.iter().collect()
    }

    /// Returns `true` when the section is readable, writable and executable
    /// at the same time, which legitimate linkers essentially never emit.
    #[must_use]
    pub fn is_suspicious(&self) -> bool {
        self.flags().contains(
            SectionFlags::MEM_READ | SectionFlags::MEM_WRITE | SectionFlags::MEM_EXECUTE,
        )
    }
}
