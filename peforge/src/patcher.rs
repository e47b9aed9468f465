//! The mutation facade.
//!
//! A [`Patcher`] owns the [`ImageBuffer`] (and with it the sole write handle
//! to the file) together with the current [`Image`] header snapshot. Every
//! mutating operation rebuilds the snapshot before returning, so subsequent
//! steps always observe consistent section state. Operations are not
//! transactional on disk; callers wanting rollback take a backup copy before
//! patching.

use std::path::Path;

use crate::{
    file::ImageBuffer,
    image::{Image, SectionFlags},
    Error::NotFound,
    Result,
};

/// Coordinates structural mutations of a PE file.
#[derive(Debug)]
pub struct Patcher {
    buffer: ImageBuffer,
    image: Image,
}

impl Patcher {
    /// Open `path` read-write and parse its headers.
    ///
    /// # Errors
    /// Returns [`crate::Error::Open`] if the file cannot be opened
    /// read-write, or a parse error if it is not a PE image.
    pub fn open(path: impl AsRef<Path>) -> Result<Patcher> {
        let buffer = ImageBuffer::open(path.as_ref())?;
        let image = Image::parse(buffer.data())?;

        Ok(Patcher { buffer, image })
    }

    /// The current header snapshot.
    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// The underlying byte buffer.
    #[must_use]
    pub fn buffer(&self) -> &ImageBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut ImageBuffer {
        &mut self.buffer
    }

    /// Drop the current header snapshot and re-parse it from the buffer.
    ///
    /// Required after any operation that adds sections or rewrites section
    /// headers; all mutators on this type do it themselves.
    ///
    /// # Errors
    /// Returns a parse error if the buffer no longer holds a valid image.
    pub fn reload(&mut self) -> Result<()> {
        self.image = Image::parse(self.buffer.data())?;
        Ok(())
    }

    /// Flush the buffer back to disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if writing fails.
    pub fn save(&mut self) -> Result<()> {
        log::debug!(
            "flushing {} bytes to {}",
            self.buffer.len(),
            self.buffer.path().display()
        );
        self.buffer.save()
    }

    /// Flush and release the file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if writing fails.
    pub fn close(mut self) -> Result<()> {
        self.save()
    }

    /// The current `AddressOfEntryPoint`.
    #[must_use]
    pub fn entry_point(&self) -> u32 {
        self.image.optional.entry_point()
    }

    /// Rewrite `AddressOfEntryPoint`.
    ///
    /// The new RVA must map into a section; this also rules out an entry
    /// point of zero.
    ///
    /// # Errors
    /// Returns [`crate::Error::RvaNotMapped`] if `new_rva` does not fall
    /// within any section.
    pub fn patch_entry_point(&mut self, new_rva: u32) -> Result<()> {
        self.image.rva_to_offset(new_rva)?;

        let offset = self.image.entry_point_offset();
        self.buffer.write_le::<u32>(offset, new_rva)?;
        self.reload()
    }

    /// Set the exact R/W/X permissions of a named section.
    ///
    /// Besides the memory bits, the content kind is re-derived: executable
    /// sections are marked `CNT_CODE`, everything else
    /// `CNT_INITIALIZED_DATA`. Calling this twice with the same arguments
    /// leaves the file byte-identical.
    ///
    /// # Errors
    /// Returns [`NotFound`] if no section carries `name`.
    pub fn set_section_permissions(
        &mut self,
        name: &str,
        read: bool,
        write: bool,
        execute: bool,
    ) -> Result<()> {
        let index = self
            .image
            .section_index(name)
            .ok_or_else(|| NotFound(name.to_string()))?;

        let mut flags = SectionFlags::empty();
        if read {
            flags |= SectionFlags::MEM_READ;
        }
        if write {
            flags |= SectionFlags::MEM_WRITE;
        }
        if execute {
            flags |= SectionFlags::MEM_EXECUTE | SectionFlags::CNT_CODE;
        } else {
            flags |= SectionFlags::CNT_INITIALIZED_DATA;
        }

        // Characteristics live at offset 36 of the 40-byte section header.
        let offset = self.image.section_header_offset(index) + 36;
        self.buffer.write_le::<u32>(offset, flags.bits())?;
        self.reload()
    }

    /// Read `size` bytes at the file position an RVA maps to.
    ///
    /// # Errors
    /// Returns [`crate::Error::RvaNotMapped`] for an unmapped RVA or
    /// [`crate::Error::OutOfBounds`] if the read exceeds the file.
    pub fn read_rva(&self, rva: u32, size: usize) -> Result<&[u8]> {
        let offset = self.image.rva_to_offset(rva)?;
        self.buffer.slice(offset, size)
    }
}
