use std::path::PathBuf;

use thiserror::Error;

macro_rules! format_error {
    // Single string version
    ($msg:expr) => {
        $crate::Error::Format {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::Format {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic error type covering everything this library can return.
///
/// Variants map onto the failure modes of the individual engines: parsing
/// (`Format`, `OutOfBounds`), address translation (`RvaNotMapped`), section
/// injection (`HeaderOverflow`, `AlignmentFailure`), the directory rewriters
/// (`AlreadyImported`, `AlreadyExported`, `NotFound`, `No*Directory`,
/// `NoSignature`), the code-cave patcher (`PayloadTooLarge`) and plain I/O.
#[derive(Error, Debug)]
pub enum Error {
    /// The file could not be opened with the required access mode.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path that was being opened
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The input is not a PE image the parser accepts.
    ///
    /// Raised for a missing `MZ` magic, an `e_lfanew` pointing outside the
    /// file, a missing `PE\0\0` signature, or an optional-header magic that
    /// is neither PE32 (0x10B) nor PE32+ (0x20B). The source location where
    /// the malformation was detected is captured for debugging.
    #[error("malformed image - {file}:{line}: {message}")]
    Format {
        /// Description of what was malformed
        message: String,
        /// Source file in which this error was raised
        file: &'static str,
        /// Source line in which this error was raised
        line: u32,
    },

    /// An RVA does not fall within any section's virtual range.
    #[error("RVA 0x{0:X} does not fall within any section")]
    RvaNotMapped(u32),

    /// There is no room for one more 40-byte section header between the end
    /// of the section table and the first section's raw data.
    #[error("no space left in the header for an additional section")]
    HeaderOverflow,

    /// `FileAlignment` or `SectionAlignment` in the optional header is zero.
    #[error("FileAlignment or SectionAlignment reads as zero")]
    AlignmentFailure,

    /// The DLL is already present in the import table.
    #[error("DLL '{0}' is already imported")]
    AlreadyImported(String),

    /// The export name is already present in the export table.
    #[error("export '{0}' already exists")]
    AlreadyExported(String),

    /// A named section, export or other entity was not found.
    #[error("'{0}' not found")]
    NotFound(String),

    /// The optional header's Import Directory has a zero RVA.
    #[error("the image has no import directory")]
    NoImportDirectory,

    /// The optional header's Export Directory has a zero RVA.
    #[error("the image has no export directory")]
    NoExportDirectory,

    /// The optional header's TLS Directory has a zero RVA.
    #[error("the image has no TLS directory")]
    NoTlsDirectory,

    /// The Security Directory is empty; the image carries no signature.
    #[error("the image has no digital signature")]
    NoSignature,

    /// The payload plus the 5-byte return jump does not fit the chosen cave.
    #[error("payload of {payload} bytes does not fit a cave of {cave} bytes (5 bytes are reserved for the return jump)")]
    PayloadTooLarge {
        /// Payload size in bytes
        payload: usize,
        /// Total cave capacity in bytes
        cave: u32,
    },

    /// An out-of-bounds access was attempted on the image buffer.
    #[error("out of bound access on the image buffer")]
    OutOfBounds,

    /// A read or write failed underneath the image buffer.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
