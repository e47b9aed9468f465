//! Read-only inspection of PE images.
//!
//! [`Reader`] opens a file without taking a write handle (memory-mapped) or
//! wraps an in-memory buffer, and exposes the individual inspection
//! operations. [`Analyzer`] aggregates them into a single [`Info`] report.
//! Missing optional directories are never errors on this path: an unsigned
//! file reports `is_signed = false`, an import-less file reports an empty
//! import list.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{
    checksum::{verify_checksum, ChecksumInfo},
    codecave::{find_code_caves, CodeCave},
    deps::{analyze_dependencies, DependencyAnalysis},
    entropy::calculate_entropy,
    exports::read_export_names,
    file::{Backend, Memory, Physical},
    image::{subsystem_name, Image, SectionHeader},
    imports::{read_imports, ImportEntry},
    relocation::{read_relocations, RelocationInfo},
    signature::{signature_info, SignatureInfo},
    tls::{read_tls, TlsInfo},
    Error, Result,
};

/// A read-only view of a PE file.
pub struct Reader {
    backend: Box<dyn Backend>,
    image: Image,
    path: PathBuf,
}

impl Reader {
    /// Open `path` read-only via a memory mapping.
    ///
    /// # Errors
    /// Returns [`Error::Open`] if the file cannot be opened, or a parse
    /// error if it is not a PE image.
    pub fn open(path: impl AsRef<Path>) -> Result<Reader> {
        let path = path.as_ref();
        let backend = Physical::new(path)?;
        let image = Image::parse(backend.data())?;

        Ok(Reader {
            backend: Box::new(backend),
            image,
            path: path.to_path_buf(),
        })
    }

    /// Wrap an in-memory image.
    ///
    /// # Errors
    /// Returns a parse error if the buffer is not a PE image.
    pub fn from_vec(data: Vec<u8>) -> Result<Reader> {
        let backend = Memory::new(data);
        let image = Image::parse(backend.data())?;

        Ok(Reader {
            backend: Box::new(backend),
            image,
            path: PathBuf::new(),
        })
    }

    /// The parsed header model.
    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// The raw file bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backend.data()
    }

    /// The path the reader was opened from; empty for in-memory readers.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.backend.len() as u64
    }

    /// Architecture, bitness, entry point and image base.
    #[must_use]
    pub fn basic_info(&self) -> BasicInfo {
        BasicInfo {
            path: self.path.display().to_string(),
            file_size: self.file_size(),
            machine: self.image.coff.machine,
            architecture: self.image.coff.machine_name(),
            subsystem: subsystem_name(self.image.optional.subsystem()),
            entry_point: u64::from(self.image.optional.entry_point()),
            image_base: self.image.optional.image_base(),
            is_64bit: self.image.optional.is_64bit(),
        }
    }

    /// Per-section report including permissions and entropy.
    #[must_use]
    pub fn sections(&self) -> Vec<SectionReport> {
        self.image
            .sections
            .iter()
            .map(|section| SectionReport {
                name: section.name_str().to_string(),
                virtual_address: section.virtual_address,
                virtual_size: section.virtual_size,
                raw_size: section.size_of_raw_data,
                raw_offset: section.pointer_to_raw_data,
                characteristics: section.characteristics,
                permissions: section.permissions(),
                suspicious: section.is_suspicious(),
                entropy: self.section_entropy(section),
            })
            .collect()
    }

    /// The import table; empty when the image imports nothing.
    ///
    /// # Errors
    /// Returns a decode error for a structurally broken table.
    pub fn imports(&self) -> Result<Vec<ImportEntry>> {
        match read_imports(&self.image, self.data()) {
            Ok(entries) => Ok(entries),
            Err(Error::NoImportDirectory) => Ok(Vec::new()),
            Err(error) => Err(error),
        }
    }

    /// Exported names; empty when the image exports nothing.
    ///
    /// # Errors
    /// Returns a decode error for a structurally broken table.
    pub fn exports(&self) -> Result<Vec<String>> {
        read_export_names(&self.image, self.data())
    }

    /// The TLS directory; `has_tls = false` when absent.
    ///
    /// # Errors
    /// Returns a decode error for a structurally broken directory.
    pub fn tls(&self) -> Result<TlsInfo> {
        read_tls(&self.image, self.data())
    }

    /// Relocation block/entry counts; zeroes when absent.
    ///
    /// # Errors
    /// Returns a decode error for a structurally broken directory.
    pub fn relocations_summary(&self) -> Result<RelocationInfo> {
        read_relocations(&self.image, self.data())
    }

    /// Certificate table presence and location.
    #[must_use]
    pub fn signature_info(&self) -> SignatureInfo {
        signature_info(&self.image)
    }

    /// Stored-vs-computed checksum state.
    #[must_use]
    pub fn checksum(&self) -> ChecksumInfo {
        verify_checksum(&self.image, self.data())
    }

    /// Shannon entropy of a section's raw data.
    #[must_use]
    pub fn section_entropy(&self, section: &SectionHeader) -> f64 {
        let data = self.data();
        let start = section.pointer_to_raw_data as usize;
        let end = start
            .saturating_add(section.size_of_raw_data as usize)
            .min(data.len());
        let start = start.min(end);
        calculate_entropy(&data[start..end])
    }

    /// Code caves of at least `min_size` bytes.
    #[must_use]
    pub fn code_caves(&self, min_size: u32) -> Vec<CodeCave> {
        find_code_caves(&self.image, self.data(), min_size)
    }

    /// Recursive DLL dependency analysis rooted at this file.
    ///
    /// # Errors
    /// Returns [`Error::Format`] for in-memory readers, which have no
    /// directory to resolve siblings in.
    pub fn dependency_summary(&self, max_depth: usize) -> Result<DependencyAnalysis> {
        if self.path.as_os_str().is_empty() {
            return Err(format_error!(
                "dependency analysis requires a file-backed reader"
            ));
        }
        analyze_dependencies(&self.path, max_depth)
    }
}

/// Architecture and address-space facts about an image.
#[derive(Debug, Clone, Serialize)]
pub struct BasicInfo {
    pub path: String,
    pub file_size: u64,
    pub machine: u16,
    pub architecture: String,
    pub subsystem: String,
    pub entry_point: u64,
    pub image_base: u64,
    pub is_64bit: bool,
}

/// One section in an analysis report.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_size: u32,
    pub raw_offset: u32,
    pub characteristics: u32,
    /// `"RWX"`-style permission string
    pub permissions: String,
    /// Readable, writable and executable at once
    pub suspicious: bool,
    /// Shannon entropy of the raw data
    pub entropy: f64,
}

/// The aggregate analysis report.
#[derive(Debug, Clone, Serialize)]
pub struct Info {
    pub path: String,
    pub file_size: u64,
    pub architecture: String,
    pub subsystem: String,
    pub entry_point: u64,
    pub image_base: u64,
    pub is_64bit: bool,
    pub checksum: ChecksumInfo,
    pub signature: SignatureInfo,
    pub sections: Vec<SectionReport>,
    pub imports: Vec<ImportEntry>,
    pub exports: Vec<String>,
    pub tls: TlsInfo,
    pub relocations: RelocationInfo,
}

/// Aggregates every inspection operation into one [`Info`].
pub struct Analyzer<'a> {
    reader: &'a Reader,
}

impl<'a> Analyzer<'a> {
    /// Create an analyzer over an open reader.
    #[must_use]
    pub fn new(reader: &'a Reader) -> Analyzer<'a> {
        Analyzer { reader }
    }

    /// Extract the full report.
    ///
    /// Structurally broken optional directories degrade to their absent
    /// form here; use the individual [`Reader`] accessors to surface those
    /// errors.
    ///
    /// # Errors
    /// Currently infallible for any image that parsed, but kept fallible
    /// for interface stability.
    pub fn analyze(&self) -> Result<Info> {
        let reader = self.reader;
        let basic = reader.basic_info();

        Ok(Info {
            path: basic.path,
            file_size: basic.file_size,
            architecture: basic.architecture,
            subsystem: basic.subsystem,
            entry_point: basic.entry_point,
            image_base: basic.image_base,
            is_64bit: basic.is_64bit,
            checksum: reader.checksum(),
            signature: reader.signature_info(),
            sections: reader.sections(),
            imports: reader.imports().unwrap_or_default(),
            exports: reader.exports().unwrap_or_default(),
            tls: reader.tls().unwrap_or_default(),
            relocations: reader.relocations_summary().unwrap_or_default(),
        })
    }
}
