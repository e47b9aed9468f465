//! Code-cave detection and cave patching.
//!
//! A code cave is a maximal run of identical filler bytes - all `0x00` or
//! all `0xCC` - inside a section's raw data. The detector scans every
//! section in a single pass; the patcher writes a payload into a chosen cave
//! followed by a 5-byte near jump back to the original entry point and
//! retargets `AddressOfEntryPoint` at the cave.

use serde::Serialize;

use crate::{Error::PayloadTooLarge, Image, Patcher, Result, SectionHeader};

/// A usable code cave.
#[derive(Debug, Clone, Serialize)]
pub struct CodeCave {
    /// Name of the owning section
    pub section: String,
    /// File offset of the first filler byte
    pub offset: u32,
    /// RVA of the first filler byte
    pub rva: u32,
    /// Run length in bytes
    pub size: u32,
    /// Fill pattern, `0x00` or `0xCC`
    pub fill_byte: u8,
}

/// Scan all sections of `image` for caves of at least `min_size` bytes.
#[must_use]
pub fn find_code_caves(image: &Image, data: &[u8], min_size: u32) -> Vec<CodeCave> {
    let mut caves = Vec::new();

    for section in &image.sections {
        let start = section.pointer_to_raw_data as usize;
        let end = start.saturating_add(section.size_of_raw_data as usize);
        let end = end.min(data.len());
        let start = start.min(end);

        scan_section(section, &data[start..end], min_size, &mut caves);
    }

    caves
}

fn is_filler(byte: u8) -> bool {
    byte == 0x00 || byte == 0xCC
}

#[allow(clippy::cast_possible_truncation)]
fn scan_section(section: &SectionHeader, data: &[u8], min_size: u32, caves: &mut Vec<CodeCave>) {
    let mut run_start: Option<usize> = None;
    let mut fill_byte = 0u8;

    let mut emit = |start: usize, end: usize, fill: u8, caves: &mut Vec<CodeCave>| {
        if (end - start) as u32 >= min_size {
            caves.push(CodeCave {
                section: section.name_str().to_string(),
                offset: section.pointer_to_raw_data + start as u32,
                rva: section.virtual_address + start as u32,
                size: (end - start) as u32,
                fill_byte: fill,
            });
        }
    };

    for (index, &byte) in data.iter().enumerate() {
        if is_filler(byte) {
            match run_start {
                None => {
                    run_start = Some(index);
                    fill_byte = byte;
                }
                Some(start) if byte != fill_byte => {
                    // Filler changed mid-run: close the old run, open a new
                    // one at this byte.
                    emit(start, index, fill_byte, caves);
                    run_start = Some(index);
                    fill_byte = byte;
                }
                Some(_) => {}
            }
        } else if let Some(start) = run_start.take() {
            emit(start, index, fill_byte, caves);
        }
    }

    // A run can extend to the very end of the section.
    if let Some(start) = run_start {
        emit(start, data.len(), fill_byte, caves);
    }
}

impl Patcher {
    /// Scan the image for code caves of at least `min_size` bytes.
    #[must_use]
    pub fn code_caves(&self, min_size: u32) -> Vec<CodeCave> {
        find_code_caves(self.image(), self.buffer().data(), min_size)
    }

    /// Write `code` into `cave` followed by a near jump back to the original
    /// entry point, then retarget the entry point at the cave.
    ///
    /// Returns the original entry-point RVA so the caller can restore it.
    ///
    /// # Errors
    /// Returns [`PayloadTooLarge`] when `code` plus the 5-byte jump exceeds
    /// the cave, or any error of the underlying writes.
    pub fn inject_code_cave_with_jump(
        &mut self,
        cave: &CodeCave,
        code: &[u8],
        update_checksum: bool,
    ) -> Result<u32> {
        if code.len() + 5 > cave.size as usize {
            return Err(PayloadTooLarge {
                payload: code.len(),
                cave: cave.size,
            });
        }

        let original_entry = self.entry_point();

        // E9 rel32: displacement is relative to the end of the instruction.
        #[allow(clippy::cast_possible_truncation)]
        let jump_source = cave.rva + code.len() as u32 + 5;
        let displacement = original_entry.wrapping_sub(jump_source);

        let mut patch = Vec::with_capacity(code.len() + 5);
        patch.extend_from_slice(code);
        patch.push(0xE9);
        patch.extend_from_slice(&displacement.to_le_bytes());

        self.buffer_mut().write_bytes(cave.offset as usize, &patch)?;
        self.patch_entry_point(cave.rva)?;

        if update_checksum {
            self.update_checksum()?;
        }

        Ok(original_entry)
    }
}
