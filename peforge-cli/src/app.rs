use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// peforge - analyze and structurally patch Windows PE files
#[derive(Debug, Parser)]
#[command(name = "peforge", version, about, long_about = None)]
pub struct Cli {
    /// Path to the PE file (.exe, .dll, .sys).
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(flatten)]
    pub analysis: AnalysisOptions,

    #[command(flatten)]
    pub patch: PatchOptions,
}

/// Options shared by analysis and patch mode.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit analysis output as JSON instead of human-readable text.
    #[arg(long)]
    pub json: bool,

    /// Verbose mode: list every imported/exported function and enable
    /// debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Analysis-mode options.
#[derive(Debug, Parser)]
pub struct AnalysisOptions {
    /// Only show suspicious sections (RWX permissions).
    #[arg(short, long)]
    pub suspicious_only: bool,

    /// Detect code caves (filler-byte runs usable for injected code).
    #[arg(long)]
    pub caves: bool,

    /// Minimum code-cave size in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 32)]
    pub min_cave_size: u32,

    /// List detailed import information (every function).
    #[arg(long)]
    pub list_imports: bool,

    /// Analyze DLL dependencies recursively.
    #[arg(long)]
    pub deps: bool,

    /// Maximum dependency-analysis depth.
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub max_depth: usize,

    /// Print dependencies as a flat list instead of a tree.
    #[arg(long)]
    pub flat: bool,
}

/// Patch-mode options; `--patch` gates all of them.
#[derive(Debug, Parser)]
pub struct PatchOptions {
    /// Patch mode: modify the PE file.
    #[arg(long)]
    pub patch: bool,

    /// Name of the section to modify.
    #[arg(long, value_name = "NAME")]
    pub section: Option<String>,

    /// New section permissions (e.g. R-X, RW-, RWX).
    #[arg(long, value_name = "RWX")]
    pub perms: Option<String>,

    /// New entry-point RVA (hex, e.g. 0x1000).
    #[arg(long, value_name = "RVA")]
    pub entry: Option<String>,

    /// Inject a new section with the given name (at most 8 bytes).
    #[arg(long, value_name = "NAME")]
    pub inject_section: Option<String>,

    /// Size of the injected section in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 4096)]
    pub section_size: u32,

    /// Permissions of the injected section.
    #[arg(long, value_name = "RWX", default_value = "RWX")]
    pub section_perms: String,

    /// Add a DLL import (format: DLL.dll:Func1,Func2,...).
    #[arg(long, value_name = "DLL:FUNCS")]
    pub add_import: Option<String>,

    /// Add an exported function with the given name (requires --export-rva).
    #[arg(long, value_name = "NAME")]
    pub add_export: Option<String>,

    /// Retarget an exported function (requires --export-rva).
    #[arg(long, value_name = "NAME")]
    pub modify_export: Option<String>,

    /// Remove an exported function.
    #[arg(long, value_name = "NAME")]
    pub remove_export: Option<String>,

    /// Export RVA (hex) for --add-export / --modify-export.
    #[arg(long, value_name = "RVA")]
    pub export_rva: Option<String>,

    /// Remove the digital signature.
    #[arg(long)]
    pub remove_signature: bool,

    /// Truncate the certificate data when removing the signature.
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub truncate_cert: bool,

    /// Prepend a TLS callback at the given RVA (hex).
    #[arg(long, value_name = "RVA")]
    pub add_tls_callback: Option<String>,

    /// Inject code from a file into the largest fitting code cave and jump
    /// back to the original entry point.
    #[arg(long, value_name = "PAYLOAD")]
    pub inject_cave: Option<PathBuf>,

    /// Update the PE checksum after patching.
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub update_checksum: bool,

    /// Create a .bak backup copy before patching.
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub backup: bool,
}
