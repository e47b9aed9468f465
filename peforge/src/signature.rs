//! Authenticode signature presence and removal.
//!
//! The Security Directory (index 4) is the one data directory whose
//! `VirtualAddress` field is a plain *file offset*; it is never routed
//! through RVA translation. Removal clears the directory entry and
//! optionally truncates the file at the certificate table, which for a
//! normally signed image is the very end of the file.

use serde::Serialize;

use crate::{image::directory, Error::NoSignature, Image, Patcher, Result};

/// Presence and location of the certificate table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignatureInfo {
    /// Whether a certificate table is present
    pub is_signed: bool,
    /// File offset of the WIN_CERTIFICATE blob
    pub offset: u32,
    /// Size of the blob in bytes
    pub size: u32,
}

/// Inspect the Security Directory of a parsed image.
#[must_use]
pub fn signature_info(image: &Image) -> SignatureInfo {
    match image.directory(directory::SECURITY) {
        Some(dir) => SignatureInfo {
            is_signed: true,
            offset: dir.virtual_address,
            size: dir.size,
        },
        None => SignatureInfo {
            is_signed: false,
            offset: 0,
            size: 0,
        },
    }
}

impl Patcher {
    /// Inspect the Security Directory.
    #[must_use]
    pub fn signature_info(&self) -> SignatureInfo {
        signature_info(self.image())
    }

    /// Remove the digital signature.
    ///
    /// Clears Security Directory entry. With `truncate`, the file is also
    /// cut at the certificate table's offset, dropping the blob itself.
    ///
    /// # Errors
    /// Returns [`NoSignature`] when the image carries none.
    pub fn remove_signature(&mut self, truncate: bool) -> Result<()> {
        let info = self.signature_info();
        if !info.is_signed {
            return Err(NoSignature);
        }

        let dir_offset = self.image().data_directory_offset(directory::SECURITY);
        let buffer = self.buffer_mut();
        buffer.write_le::<u32>(dir_offset, 0)?;
        buffer.write_le::<u32>(dir_offset + 4, 0)?;

        if truncate && info.offset > 0 && (info.offset as usize) < buffer.len() {
            buffer.truncate(info.offset as usize);
        }

        self.reload()
    }
}
