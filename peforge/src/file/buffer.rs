//! Mutable image buffer with an exclusive write handle.

use std::{
    fs::{self, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    file::io::{read_le_at, write_le_at, PeIO},
    Error::{Open, OutOfBounds},
    Result,
};

/// The mutable byte buffer of a whole PE file.
///
/// Owns its storage and the read-write handle to the underlying file. All
/// other components borrow it; every read and write is bounds-checked. The
/// buffer length always equals what the on-disk file size will be after the
/// next [`save`](ImageBuffer::save) - mutations happen in memory and are
/// flushed to disk only on an explicit save.
#[derive(Debug)]
pub struct ImageBuffer {
    path: PathBuf,
    file: fs::File,
    data: Vec<u8>,
}

impl ImageBuffer {
    /// Open `path` read-write and load its contents.
    ///
    /// The write handle stays open for the lifetime of the buffer, so a
    /// single patcher holds exclusive write access to the file.
    ///
    /// # Errors
    /// Returns [`Open`] if the file cannot be opened with read-write access
    /// or [`crate::Error::Io`] if reading it fails.
    pub fn open(path: &Path) -> Result<ImageBuffer> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(error) => {
                return Err(Open {
                    path: path.to_path_buf(),
                    source: error,
                })
            }
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        Ok(ImageBuffer {
            path: path.to_path_buf(),
            file,
            data,
        })
    }

    /// Returns the path the buffer was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the whole buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns a bounds-checked slice of the buffer.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if the requested range exceeds the buffer.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..end])
    }

    /// Read a little-endian integer at `offset`.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if the read exceeds the buffer.
    pub fn read_le<T: PeIO>(&self, offset: usize) -> Result<T> {
        let mut offset = offset;
        read_le_at::<T>(&self.data, &mut offset)
    }

    /// Write a little-endian integer at `offset`.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if the write exceeds the buffer.
    pub fn write_le<T: PeIO>(&mut self, offset: usize, value: T) -> Result<()> {
        let mut offset = offset;
        write_le_at::<T>(&mut self.data, &mut offset, value)
    }

    /// Copy `bytes` into the buffer at `offset`.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if the write exceeds the buffer.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return Err(OutOfBounds);
        };

        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Zero-fill the given range of the buffer.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] if the range exceeds the buffer.
    pub fn zero_range(&mut self, offset: usize, len: usize) -> Result<()> {
        let Some(end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        self.data[offset..end].fill(0);
        Ok(())
    }

    /// Grow the buffer to `new_len`, zero-filling the gap. A `new_len` at or
    /// below the current length is a no-op.
    pub fn extend_to(&mut self, new_len: usize) {
        if new_len > self.data.len() {
            self.data.resize(new_len, 0);
        }
    }

    /// Shrink the buffer to `new_len`. A `new_len` at or above the current
    /// length is a no-op. The file itself shrinks on the next save.
    pub fn truncate(&mut self, new_len: usize) {
        self.data.truncate(new_len);
    }

    /// Flush the buffer back to disk, adjusting the file length to match.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if writing fails.
    pub fn save(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.data)?;
        self.file.set_len(self.data.len() as u64)?;
        self.file.flush()?;
        Ok(())
    }
}
