//! TLS directory reading and the callback appender.
//!
//! `AddressOfCallBacks` holds a *virtual address*, not an RVA; every access
//! converts through `ImageBase`. The callback array itself is pointer-sized
//! and NUL-terminated.

use serde::Serialize;

use crate::{
    file::io::{read_le_at, read_ptr_at, write_ptr_at},
    image::{directory, Image, SectionFlags},
    Error::NoTlsDirectory,
    Patcher, Result,
};

/// Upper bound on decoded callbacks, as a brake against corrupt arrays.
const MAX_CALLBACKS: usize = 100;

/// Decoded TLS directory contents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TlsInfo {
    /// Whether the image has a TLS directory at all
    pub has_tls: bool,
    /// Callback VAs in array order
    pub callbacks: Vec<u64>,
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}

/// Offset of `AddressOfCallBacks` within the TLS directory: three
/// pointer-sized fields precede it.
fn callbacks_field_offset(ptr_size: usize) -> usize {
    ptr_size * 3
}

fn read_callback_array(
    image: &Image,
    data: &[u8],
    callbacks_va: u64,
    ptr_size: usize,
) -> Result<Vec<u64>> {
    let image_base = image.optional.image_base();
    let Some(callbacks_rva) = callbacks_va.checked_sub(image_base) else {
        return Err(format_error!(
            "TLS callback VA {:#X} lies below the image base",
            callbacks_va
        ));
    };

    #[allow(clippy::cast_possible_truncation)]
    let mut offset = image.rva_to_offset(callbacks_rva as u32)?;

    let mut callbacks = Vec::new();
    for _ in 0..MAX_CALLBACKS {
        let callback = read_ptr_at(data, &mut offset, ptr_size)?;
        if callback == 0 {
            break;
        }
        callbacks.push(callback);
    }

    Ok(callbacks)
}

/// Read the TLS directory, returning `has_tls = false` when absent.
///
/// # Errors
/// Returns a decode error for a structurally broken directory.
pub fn read_tls(image: &Image, data: &[u8]) -> Result<TlsInfo> {
    let Some(dir) = image.directory(directory::TLS) else {
        return Ok(TlsInfo::default());
    };

    let tls_offset = image.rva_to_offset(dir.virtual_address)?;
    let ptr_size = image.optional.ptr_size();

    let mut cursor = tls_offset;
    let start_address_of_raw_data = read_ptr_at(data, &mut cursor, ptr_size)?;
    let end_address_of_raw_data = read_ptr_at(data, &mut cursor, ptr_size)?;
    let address_of_index = read_ptr_at(data, &mut cursor, ptr_size)?;
    let address_of_callbacks = read_ptr_at(data, &mut cursor, ptr_size)?;
    let size_of_zero_fill = read_le_at::<u32>(data, &mut cursor)?;
    let characteristics = read_le_at::<u32>(data, &mut cursor)?;

    let callbacks = if address_of_callbacks != 0 {
        read_callback_array(image, data, address_of_callbacks, ptr_size)?
    } else {
        Vec::new()
    };

    Ok(TlsInfo {
        has_tls: true,
        callbacks,
        start_address_of_raw_data,
        end_address_of_raw_data,
        address_of_index,
        size_of_zero_fill,
        characteristics,
    })
}

impl Patcher {
    /// Read the TLS directory of the patched image.
    ///
    /// # Errors
    /// Returns a decode error for a structurally broken directory.
    pub fn tls(&self) -> Result<TlsInfo> {
        read_tls(self.image(), self.buffer().data())
    }

    /// Prepend a TLS callback at `callback_rva` to the image's callback
    /// list.
    ///
    /// The extended array is written into a fresh `.tlscb` section and the
    /// TLS directory's `AddressOfCallBacks` is retargeted at it. The new
    /// callback runs before all existing ones.
    ///
    /// # Errors
    /// Returns [`NoTlsDirectory`] when the image has no TLS directory.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_tls_callback(&mut self, callback_rva: u32) -> Result<()> {
        let image = self.image();
        let data = self.buffer().data();

        let Some(dir) = image.directory(directory::TLS) else {
            return Err(NoTlsDirectory);
        };

        let ptr_size = image.optional.ptr_size();
        let image_base = image.optional.image_base();
        let tls_dir_rva = dir.virtual_address;

        let tls_offset = image.rva_to_offset(tls_dir_rva)?;
        let mut cursor = tls_offset + callbacks_field_offset(ptr_size);
        let callbacks_va = read_ptr_at(data, &mut cursor, ptr_size)?;

        let existing = if callbacks_va != 0 {
            read_callback_array(image, data, callbacks_va, ptr_size)?
        } else {
            Vec::new()
        };

        // New callback first, then the original chain, then the terminator.
        let mut array = vec![0u8; (existing.len() + 2) * ptr_size];
        let mut cursor = 0usize;
        write_ptr_at(
            &mut array,
            &mut cursor,
            ptr_size,
            image_base + u64::from(callback_rva),
        )?;
        for callback in &existing {
            write_ptr_at(&mut array, &mut cursor, ptr_size, *callback)?;
        }

        self.inject_section(
            ".tlscb",
            &array,
            SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ,
        )?;

        let new_section = self
            .image()
            .sections
            .last()
            .ok_or_else(|| format_error!("image lost its sections across injection"))?;
        let new_callbacks_va = image_base + u64::from(new_section.virtual_address);

        // The TLS directory RVA itself did not move; retarget its
        // AddressOfCallBacks field at the new array.
        let tls_offset = self.image().rva_to_offset(tls_dir_rva)?;
        let field_offset = tls_offset + callbacks_field_offset(ptr_size);
        let buffer = self.buffer_mut();
        if ptr_size == 8 {
            buffer.write_le::<u64>(field_offset, new_callbacks_va)?;
        } else {
            buffer.write_le::<u32>(field_offset, new_callbacks_va as u32)?;
        }

        self.reload()
    }
}
