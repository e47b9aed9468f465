//! Section injection.
//!
//! Appends one section to the end of the table: raw data goes after the
//! last section's raw data rounded up to `FileAlignment`, the virtual range
//! after the last section's virtual range rounded up to `SectionAlignment`.
//! `NumberOfSections` and `SizeOfImage` are updated in place and the header
//! model is re-parsed before returning.

use crate::{
    image::{SectionFlags, SECTION_HEADER_SIZE},
    Error::{AlignmentFailure, HeaderOverflow},
    Patcher, Result,
};

/// Round `value` up to the next multiple of `alignment`. An alignment of
/// zero returns the value unchanged; callers reject that case beforehand.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

impl Patcher {
    /// Append a new section named `name` holding `payload`.
    ///
    /// The payload is zero-padded up to the file alignment. The section name
    /// must be at most 8 bytes.
    ///
    /// # Errors
    /// - [`AlignmentFailure`] when `FileAlignment` or `SectionAlignment`
    ///   reads as zero
    /// - [`HeaderOverflow`] when no room is left for one more 40-byte
    ///   section header before the first section's raw data
    /// - [`crate::Error::Format`] for an over-long name or an image without
    ///   sections
    #[allow(clippy::cast_possible_truncation)]
    pub fn inject_section(
        &mut self,
        name: &str,
        payload: &[u8],
        characteristics: SectionFlags,
    ) -> Result<()> {
        if name.len() > 8 {
            return Err(format_error!(
                "section name '{}' exceeds 8 bytes",
                name
            ));
        }

        let image = self.image();
        let file_alignment = u64::from(image.optional.file_alignment());
        let section_alignment = u64::from(image.optional.section_alignment());
        if file_alignment == 0 || section_alignment == 0 {
            return Err(AlignmentFailure);
        }

        let Some(first) = image.sections.first() else {
            return Err(format_error!("image has no sections to append after"));
        };

        // One more header must fit between the table and the first raw data.
        let count = image.sections.len();
        let table_end = image.section_table_offset() + (count + 1) * SECTION_HEADER_SIZE;
        if table_end > first.pointer_to_raw_data as usize {
            return Err(HeaderOverflow);
        }

        let last = image
            .sections
            .iter()
            .max_by_key(|s| s.raw_end())
            .unwrap_or(first);

        let raw_offset = align_up(last.raw_end(), file_alignment);
        let virtual_address = align_up(
            u64::from(last.virtual_address) + u64::from(last.virtual_size),
            section_alignment,
        ) as u32;
        let virtual_size = payload.len() as u32;
        let raw_size = align_up(payload.len() as u64, file_alignment);

        let header_offset = image.section_header_offset(count);
        let nsections_offset = image.number_of_sections_offset();
        let size_of_image_offset = image.size_of_image_offset();
        let number_of_sections = image.coff.number_of_sections;

        log::debug!(
            "injecting section '{}': rva {:#X}, raw offset {:#X}, raw size {:#X}",
            name,
            virtual_address,
            raw_offset,
            raw_size
        );

        // Grow the buffer if needed and clear the whole raw region so the
        // padding past the payload is zero even when overlay bytes were
        // already present there.
        let buffer = self.buffer_mut();
        buffer.extend_to((raw_offset + raw_size) as usize);
        buffer.zero_range(raw_offset as usize, raw_size as usize)?;
        buffer.write_bytes(raw_offset as usize, payload)?;

        // The 40-byte section header.
        let mut header = [0u8; SECTION_HEADER_SIZE];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[8..12].copy_from_slice(&virtual_size.to_le_bytes());
        header[12..16].copy_from_slice(&virtual_address.to_le_bytes());
        header[16..20].copy_from_slice(&(raw_size as u32).to_le_bytes());
        header[20..24].copy_from_slice(&(raw_offset as u32).to_le_bytes());
        header[36..40].copy_from_slice(&characteristics.bits().to_le_bytes());
        buffer.write_bytes(header_offset, &header)?;

        buffer.write_le::<u16>(nsections_offset, number_of_sections + 1)?;

        let size_of_image =
            u64::from(virtual_address) + align_up(u64::from(virtual_size), section_alignment);
        buffer.write_le::<u32>(size_of_image_offset, size_of_image as u32)?;

        self.reload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_basics() {
        assert_eq!(align_up(0, 0x200), 0);
        assert_eq!(align_up(1, 0x200), 0x200);
        assert_eq!(align_up(0x200, 0x200), 0x200);
        assert_eq!(align_up(0x201, 0x200), 0x400);
        assert_eq!(align_up(0x340, 0x1000), 0x1000);
        assert_eq!(align_up(77, 0), 77);
    }
}
