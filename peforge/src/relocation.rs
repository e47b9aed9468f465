//! Base relocation summary.

use serde::Serialize;

use crate::{
    file::io::read_le_at,
    image::{directory, Image},
    Result,
};

/// Aggregate shape of the Base Relocation Directory.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RelocationInfo {
    /// Whether the directory is present
    pub has_relocations: bool,
    /// Number of relocation blocks
    pub block_count: usize,
    /// Total 2-byte entries across all blocks
    pub total_entries: usize,
}

/// Count relocation blocks and entries, reporting `has_relocations = false`
/// when the directory is absent.
///
/// # Errors
/// Returns a translation error when the directory RVA does not map.
pub fn read_relocations(image: &Image, data: &[u8]) -> Result<RelocationInfo> {
    let Some(dir) = image.directory(directory::BASE_RELOC) else {
        return Ok(RelocationInfo::default());
    };

    let mut info = RelocationInfo {
        has_relocations: true,
        ..RelocationInfo::default()
    };

    let start = image.rva_to_offset(dir.virtual_address)?;
    let end = start + dir.size as usize;

    let mut offset = start;
    while offset < end {
        let mut cursor = offset;
        let Ok(_page_rva) = read_le_at::<u32>(data, &mut cursor) else {
            break;
        };
        let Ok(block_size) = read_le_at::<u32>(data, &mut cursor) else {
            break;
        };

        // Each block is an 8-byte header followed by 2-byte entries. Treat
        // degenerate sizes as the end of the table.
        if block_size < 8 || block_size > 0x10000 {
            break;
        }

        info.block_count += 1;
        info.total_entries += (block_size as usize - 8) / 2;
        offset += block_size as usize;
    }

    Ok(info)
}
