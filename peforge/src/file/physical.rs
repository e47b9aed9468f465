use super::Backend;
use crate::{
    Error::{Open, OutOfBounds},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// Read-only backend backed by a memory-mapped file on disk.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Map the file at `path` read-only.
    ///
    /// ## Arguments
    /// * 'path' - The file path to map
    ///
    /// # Errors
    /// Returns [`Open`] if the file cannot be opened or mapped
    pub fn new(path: &Path) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => {
                return Err(Open {
                    path: path.to_path_buf(),
                    source: error,
                })
            }
        };

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => {
                return Err(Open {
                    path: path.to_path_buf(),
                    source: error,
                })
            }
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn physical_maps_and_bounds_checks() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0x4D, 0x5A, 0x00, 0x01]).unwrap();
        tmp.flush().unwrap();

        let physical = Physical::new(tmp.path()).unwrap();
        assert_eq!(physical.len(), 4);
        assert_eq!(physical.data(), &[0x4D, 0x5A, 0x00, 0x01]);
        assert_eq!(physical.data_slice(1, 2).unwrap(), &[0x5A, 0x00]);

        assert!(physical.data_slice(3, 2).is_err());
        assert!(physical.data_slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let result = Physical::new(Path::new("/nonexistent/path/to/file.dll"));
        match result {
            Err(Open { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("expected Open error"),
        }
    }
}
