//! Parse, analyze and structurally rewrite Windows PE images.
//!
//! `peforge` reads Portable Executable files - both PE32 (32-bit) and PE32+
//! (64-bit) - and mutates their on-disk structures while preserving the
//! invariants the Windows loader enforces. The crate is organised as layered
//! components; each layer depends only on the layers below:
//!
//! - [`file`] - bounds-checked byte access: the read-only [`Backend`]
//!   implementations and the mutable [`ImageBuffer`]
//! - [`image`] - the parsed header model with RVA/offset translation
//! - [`Patcher`] - the mutation facade: section injection, the
//!   IAT-preserving import rewriter, export rewriting, signature removal,
//!   TLS-callback injection, code-cave patching and checksum updates
//! - [`Reader`] / [`Analyzer`] - read-only inspection: sections, imports,
//!   exports, TLS, relocations, entropy, signature presence, code caves and
//!   recursive DLL dependencies
//!
//! # Examples
//!
//! Inspect an image:
//!
//! ```rust,no_run
//! use peforge::{Analyzer, Reader};
//! use std::path::Path;
//!
//! let reader = Reader::open(Path::new("app.exe"))?;
//! let info = Analyzer::new(&reader).analyze()?;
//! println!("{} sections, entry at {:#X}", info.sections.len(), info.entry_point);
//! # Ok::<(), peforge::Error>(())
//! ```
//!
//! Add an import without disturbing the original IAT:
//!
//! ```rust,no_run
//! use peforge::Patcher;
//! use std::path::Path;
//!
//! let mut patcher = Patcher::open(Path::new("app.exe"))?;
//! patcher.add_import("user32.dll", &["MessageBoxA".to_string()])?;
//! patcher.update_checksum()?;
//! patcher.close()?;
//! # Ok::<(), peforge::Error>(())
//! ```
//!
//! # Concurrency
//!
//! The crate is single-threaded by design. One [`Patcher`] owns exclusive
//! write access to its file; read-only [`Reader`]s can coexist freely.

#![warn(missing_docs)]

#[macro_use]
mod error;

pub mod file;
pub mod image;

mod analysis;
mod checksum;
mod codecave;
mod deps;
mod entropy;
mod exports;
mod imports;
mod patcher;
mod relocation;
mod section;
mod signature;
mod tls;

#[cfg(test)]
pub(crate) mod test;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;

pub use analysis::{Analyzer, BasicInfo, Info, Reader, SectionReport};
pub use checksum::{compute_checksum, verify_checksum, ChecksumInfo};
pub use codecave::{find_code_caves, CodeCave};
pub use deps::{analyze_dependencies, DependencyAnalysis, DependencyNode};
pub use entropy::calculate_entropy;
pub use exports::{read_export_names, read_exports, ExportEntry, ExportTable};
pub use file::{Backend, ImageBuffer, Memory, Physical};
pub use image::{
    directory, CoffHeader, DataDirectory, DosHeader, Image, OptionalHeader, SectionFlags,
    SectionHeader,
};
pub use imports::{read_imports, ImportEntry, ImportedSymbol};
pub use patcher::Patcher;
pub use relocation::{read_relocations, RelocationInfo};
pub use signature::{signature_info, SignatureInfo};
pub use tls::{read_tls, TlsInfo};
