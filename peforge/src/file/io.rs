//! Little-endian codec primitives for PE structures.
//!
//! The [`PeIO`] trait abstracts over reading and writing primitive integers
//! at arbitrary offsets of a byte slice. Every multi-byte field in a PE
//! image is little-endian, so only the little-endian direction is exposed.

use crate::{Error::OutOfBounds, Result};

/// Trait implementing type specific safe readers / writers.
///
/// Implemented for the unsigned integer widths that occur in PE headers and
/// tables. Thunk entries are 4 or 8 bytes depending on bitness; callers pick
/// the width at runtime via [`read_ptr_at`] / [`write_ptr_at`].
pub trait PeIO: Sized {
    #[allow(missing_docs)]
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Decode `Self` from a little-endian byte array
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Encode `Self` into a little-endian byte array
    fn to_le_bytes(self) -> Self::Bytes;
}

impl PeIO for u8 {
    type Bytes = [u8; 1];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u8::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u8::to_le_bytes(self)
    }
}

impl PeIO for u16 {
    type Bytes = [u8; 2];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u16::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u16::to_le_bytes(self)
    }
}

impl PeIO for u32 {
    type Bytes = [u8; 4];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u32::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u32::to_le_bytes(self)
    }
}

impl PeIO for u64 {
    type Bytes = [u8; 8];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u64::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u64::to_le_bytes(self)
    }
}

/// Safely read T in little-endian from `data` at `offset`, advancing the
/// offset by the amount of bytes read.
///
/// ## Arguments
/// * 'data'    - The data buffer to read from
/// * 'offset'  - The offset to read at, advanced on success
///
/// # Errors
/// Returns [`OutOfBounds`] if reading would exceed the data length
pub fn read_le_at<T: PeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };

    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Safely write T in little-endian into `data` at `offset`, advancing the
/// offset by the amount of bytes written.
///
/// ## Arguments
/// * 'data'    - The data buffer to write into
/// * 'offset'  - The offset to write at, advanced on success
/// * 'value'   - The value to encode
///
/// # Errors
/// Returns [`OutOfBounds`] if writing would exceed the data length
pub fn write_le_at<T: PeIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };

    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}

/// Read a pointer-sized thunk value (4 bytes on PE32, 8 bytes on PE32+),
/// zero-extended to `u64`.
///
/// ## Arguments
/// * 'data'        - The data buffer to read from
/// * 'offset'      - The offset to read at, advanced on success
/// * 'ptr_size'    - 4 or 8
///
/// # Errors
/// Returns [`OutOfBounds`] if reading would exceed the data length
pub fn read_ptr_at(data: &[u8], offset: &mut usize, ptr_size: usize) -> Result<u64> {
    if ptr_size == 8 {
        read_le_at::<u64>(data, offset)
    } else {
        Ok(u64::from(read_le_at::<u32>(data, offset)?))
    }
}

/// Write a pointer-sized thunk value (4 bytes on PE32, 8 bytes on PE32+).
///
/// ## Arguments
/// * 'data'        - The data buffer to write into
/// * 'offset'      - The offset to write at, advanced on success
/// * 'ptr_size'    - 4 or 8
/// * 'value'       - The value to encode; truncated to 32 bits on PE32
///
/// # Errors
/// Returns [`OutOfBounds`] if writing would exceed the data length
#[allow(clippy::cast_possible_truncation)]
pub fn write_ptr_at(data: &mut [u8], offset: &mut usize, ptr_size: usize, value: u64) -> Result<()> {
    if ptr_size == 8 {
        write_le_at::<u64>(data, offset, value)
    } else {
        write_le_at::<u32>(data, offset, value as u32)
    }
}

/// Read a NUL-terminated string starting at `offset`.
///
/// ## Arguments
/// * 'data'    - The data buffer to read from
/// * 'offset'  - Where the string starts
///
/// # Errors
/// Returns [`OutOfBounds`] if no terminator exists before the end of the
/// buffer, or [`Error::Format`](crate::Error::Format) for invalid UTF-8
pub fn read_cstring_at(data: &[u8], offset: usize) -> Result<String> {
    if offset >= data.len() {
        return Err(OutOfBounds);
    }

    let mut end = offset;
    while end < data.len() && data[end] != 0 {
        end += 1;
    }

    if end >= data.len() {
        return Err(OutOfBounds);
    }

    String::from_utf8(data[offset..end].to_vec())
        .map_err(|_| format_error!("invalid string at offset {:#X}", offset))
}
