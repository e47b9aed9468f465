//! Import-table reading and the IAT-preserving import rewriter.
//!
//! Reading walks the descriptor array and decodes each DLL's thunks into
//! by-name or by-ordinal symbols. Rewriting appends one import without
//! moving the original Import Address Tables: compiled code and the loader
//! both reach into IAT slots at fixed RVAs, so a rewrite that relocated them
//! would break every indirect call through the table. The rewriter instead
//! builds a fresh Import Directory in a new section, points every *existing*
//! descriptor's `FirstThunk` at its original IAT and lays out a new IAT only
//! for the added DLL.

use serde::Serialize;

use crate::{
    file::io::{read_cstring_at, read_le_at, read_ptr_at, write_le_at, write_ptr_at},
    image::{directory, Image, SectionFlags, IMPORT_DESCRIPTOR_SIZE},
    section::align_up,
    Error::{AlreadyImported, NoImportDirectory},
    Patcher, Result,
};

/// IMAGE_IMPORT_DESCRIPTOR (20 bytes, array terminated by an all-zero
/// entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ImportDescriptor {
    /// RVA of the Import Name Table (INT)
    pub original_first_thunk: u32,
    /// Bound-import timestamp, usually 0
    pub time_date_stamp: u32,
    /// Forwarder chain index, usually 0 or -1
    pub forwarder_chain: u32,
    /// RVA of the NUL-terminated DLL name
    pub name: u32,
    /// RVA of the Import Address Table (IAT)
    pub first_thunk: u32,
}

impl ImportDescriptor {
    fn parse(data: &[u8], offset: &mut usize) -> Result<ImportDescriptor> {
        Ok(ImportDescriptor {
            original_first_thunk: read_le_at::<u32>(data, offset)?,
            time_date_stamp: read_le_at::<u32>(data, offset)?,
            forwarder_chain: read_le_at::<u32>(data, offset)?,
            name: read_le_at::<u32>(data, offset)?,
            first_thunk: read_le_at::<u32>(data, offset)?,
        })
    }

    fn write(&self, data: &mut [u8], offset: &mut usize) -> Result<()> {
        write_le_at::<u32>(data, offset, self.original_first_thunk)?;
        write_le_at::<u32>(data, offset, self.time_date_stamp)?;
        write_le_at::<u32>(data, offset, self.forwarder_chain)?;
        write_le_at::<u32>(data, offset, self.name)?;
        write_le_at::<u32>(data, offset, self.first_thunk)
    }

    fn is_null(&self) -> bool {
        self.original_first_thunk == 0 && self.name == 0 && self.first_thunk == 0
    }
}

/// One imported function, as referenced from an INT or IAT slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImportedSymbol {
    /// Imported by name through an `IMAGE_IMPORT_BY_NAME` record
    ByName {
        /// Export-table hint
        hint: u16,
        /// Function name
        name: String,
    },
    /// Imported by ordinal (high thunk bit set)
    ByOrdinal(u16),
}

impl ImportedSymbol {
    /// Display form: the name, or `Ordinal_N` for ordinal imports.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ImportedSymbol::ByName { name, .. } => name.clone(),
            ImportedSymbol::ByOrdinal(ordinal) => format!("Ordinal_{ordinal}"),
        }
    }
}

/// All imports of one DLL.
#[derive(Debug, Clone, Serialize)]
pub struct ImportEntry {
    /// DLL name as stored in the image
    pub dll: String,
    /// Imported functions in thunk order
    pub symbols: Vec<ImportedSymbol>,
}

/// Decoded working set of one existing import, carried through a rewrite.
#[derive(Debug, Clone)]
struct ExistingImport {
    descriptor: ImportDescriptor,
    dll: String,
    symbols: Vec<ImportedSymbol>,
}

const MAX_DESCRIPTORS: usize = 4096;
const MAX_THUNKS: usize = 10_000;

fn read_cstring_rva(image: &Image, data: &[u8], rva: u32) -> Result<String> {
    let offset = image.rva_to_offset(rva)?;
    read_cstring_at(data, offset)
}

fn read_descriptors(image: &Image, data: &[u8]) -> Result<Vec<ImportDescriptor>> {
    let dir = image
        .directory(directory::IMPORT)
        .ok_or(NoImportDirectory)?;
    let mut offset = image.rva_to_offset(dir.virtual_address)?;

    let mut descriptors = Vec::new();
    loop {
        let descriptor = ImportDescriptor::parse(data, &mut offset)?;
        if descriptor.is_null() {
            break;
        }
        descriptors.push(descriptor);

        if descriptors.len() > MAX_DESCRIPTORS {
            return Err(format_error!("unterminated import descriptor table"));
        }
    }

    Ok(descriptors)
}

fn read_thunks(image: &Image, data: &[u8], rva: u32, ptr_size: usize) -> Result<Vec<u64>> {
    let mut offset = image.rva_to_offset(rva)?;

    let mut thunks = Vec::new();
    loop {
        let thunk = read_ptr_at(data, &mut offset, ptr_size)?;
        if thunk == 0 {
            break;
        }
        thunks.push(thunk);

        if thunks.len() > MAX_THUNKS {
            return Err(format_error!("unterminated thunk array at RVA {:#X}", rva));
        }
    }

    Ok(thunks)
}

#[allow(clippy::cast_possible_truncation)]
fn decode_symbols(
    image: &Image,
    data: &[u8],
    thunks: &[u64],
    ordinal_flag: u64,
) -> Result<Vec<ImportedSymbol>> {
    let mut symbols = Vec::with_capacity(thunks.len());

    for &thunk in thunks {
        if thunk & ordinal_flag != 0 {
            symbols.push(ImportedSymbol::ByOrdinal((thunk & 0xFFFF) as u16));
        } else {
            let record_offset = image.rva_to_offset(thunk as u32)?;
            let mut cursor = record_offset;
            let hint = read_le_at::<u16>(data, &mut cursor)?;
            let name = read_cstring_at(data, cursor)?;
            symbols.push(ImportedSymbol::ByName { hint, name });
        }
    }

    Ok(symbols)
}

/// Read the full import table of an image.
///
/// # Errors
/// Returns [`NoImportDirectory`] if the Import Directory has a zero RVA, or
/// a decode error for a structurally broken table.
pub fn read_imports(image: &Image, data: &[u8]) -> Result<Vec<ImportEntry>> {
    let descriptors = read_descriptors(image, data)?;
    let ptr_size = image.optional.ptr_size();
    let ordinal_flag = image.optional.ordinal_flag();

    let mut entries = Vec::with_capacity(descriptors.len());
    for descriptor in &descriptors {
        let dll = read_cstring_rva(image, data, descriptor.name)?;

        // Old binders leave OriginalFirstThunk zero; the IAT then doubles
        // as the name table.
        let int_rva = if descriptor.original_first_thunk != 0 {
            descriptor.original_first_thunk
        } else {
            descriptor.first_thunk
        };
        let thunks = read_thunks(image, data, int_rva, ptr_size)?;
        let symbols = decode_symbols(image, data, &thunks, ordinal_flag)?;

        entries.push(ImportEntry { dll, symbols });
    }

    Ok(entries)
}

impl Patcher {
    /// List the image's imports.
    ///
    /// # Errors
    /// Returns [`NoImportDirectory`] if the image has no import table.
    pub fn imports(&self) -> Result<Vec<ImportEntry>> {
        read_imports(self.image(), self.buffer().data())
    }

    /// Add an import of `functions` (by name, hint 0) from `dll_name`.
    ///
    /// The rebuilt Import Directory lands in a fresh `.idata2` section.
    /// Every pre-existing descriptor keeps its `FirstThunk` RVA
    /// byte-for-byte, so all original IAT slots stay where application code
    /// expects them. The IAT data directory keeps covering the original
    /// range and is merely grown by the new table's size; the Bound Import
    /// and Load Config directories are cleared because both may reference
    /// the abandoned descriptor area.
    ///
    /// # Errors
    /// - [`NoImportDirectory`] when the image imports nothing at all
    /// - [`AlreadyImported`] when `dll_name` already has a descriptor
    /// - any decode or injection error
    #[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
    pub fn add_import(&mut self, dll_name: &str, functions: &[String]) -> Result<()> {
        let image = self.image();
        let data = self.buffer().data();
        let ptr_size = image.optional.ptr_size();
        let ordinal_flag = image.optional.ordinal_flag();

        // Decode the complete existing state before writing anything.
        let descriptors = read_descriptors(image, data)?;
        let mut existing = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let dll = read_cstring_rva(image, data, descriptor.name)?;
            if dll == dll_name {
                return Err(AlreadyImported(dll));
            }

            let int_rva = if descriptor.original_first_thunk != 0 {
                descriptor.original_first_thunk
            } else {
                descriptor.first_thunk
            };
            let thunks = read_thunks(image, data, int_rva, ptr_size)?;
            let symbols = decode_symbols(image, data, &thunks, ordinal_flag)?;

            existing.push(ExistingImport {
                descriptor: *descriptor,
                dll,
                symbols,
            });
        }

        let new_symbols: Vec<ImportedSymbol> = functions
            .iter()
            .map(|name| ImportedSymbol::ByName {
                hint: 0,
                name: name.clone(),
            })
            .collect();

        let original_iat_directory = image.data_directories.get(directory::IAT).copied();
        let directory_count = image.data_directories.len();

        // Fixed layout inside the new section: descriptor table, the INT of
        // every import (existing order, then new), the new import's IAT,
        // DLL-name strings, then hint/name records.
        let descriptor_table_size = (existing.len() + 2) * IMPORT_DESCRIPTOR_SIZE;
        let mut offset = descriptor_table_size;

        let mut int_offsets = Vec::with_capacity(existing.len());
        for import in &existing {
            int_offsets.push(offset);
            offset += (import.symbols.len() + 1) * ptr_size;
        }
        let new_int_offset = offset;
        offset += (new_symbols.len() + 1) * ptr_size;
        let new_iat_offset = offset;
        let new_iat_size = (new_symbols.len() + 1) * ptr_size;
        offset += new_iat_size;

        let mut dll_name_offsets = Vec::with_capacity(existing.len());
        for import in &existing {
            dll_name_offsets.push(offset);
            offset += import.dll.len() + 1;
        }
        let new_dll_name_offset = offset;
        offset += dll_name.len() + 1;

        let mut hint_name_offsets: Vec<Vec<Option<usize>>> = Vec::with_capacity(existing.len());
        for import in &existing {
            let mut offsets = Vec::with_capacity(import.symbols.len());
            for symbol in &import.symbols {
                match symbol {
                    ImportedSymbol::ByName { name, .. } => {
                        offsets.push(Some(offset));
                        offset += 2 + name.len() + 1;
                    }
                    ImportedSymbol::ByOrdinal(_) => offsets.push(None),
                }
            }
            hint_name_offsets.push(offsets);
        }
        let mut new_hint_name_offsets = Vec::with_capacity(new_symbols.len());
        for symbol in &new_symbols {
            if let ImportedSymbol::ByName { name, .. } = symbol {
                new_hint_name_offsets.push(offset);
                offset += 2 + name.len() + 1;
            }
        }

        let total_size = align_up(offset as u64, 16) as usize;

        self.inject_section(
            ".idata2",
            &vec![0u8; total_size],
            SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ | SectionFlags::MEM_WRITE,
        )?;

        let new_section = self
            .image()
            .sections
            .last()
            .ok_or_else(|| format_error!("image lost its sections across injection"))?;
        let base = new_section.virtual_address;
        let section_file_offset = new_section.pointer_to_raw_data as usize;

        let mut block = vec![0u8; total_size];
        let mut cursor = 0usize;

        // Descriptors. Existing ones keep their FirstThunk verbatim; that
        // is the IAT-preservation invariant.
        for (index, import) in existing.iter().enumerate() {
            ImportDescriptor {
                original_first_thunk: base + int_offsets[index] as u32,
                time_date_stamp: import.descriptor.time_date_stamp,
                forwarder_chain: import.descriptor.forwarder_chain,
                name: base + dll_name_offsets[index] as u32,
                first_thunk: import.descriptor.first_thunk,
            }
            .write(&mut block, &mut cursor)?;
        }
        ImportDescriptor {
            original_first_thunk: base + new_int_offset as u32,
            time_date_stamp: 0,
            forwarder_chain: 0,
            name: base + new_dll_name_offset as u32,
            first_thunk: base + new_iat_offset as u32,
        }
        .write(&mut block, &mut cursor)?;
        // The terminating descriptor stays zero.

        // INTs for the existing imports.
        for (index, import) in existing.iter().enumerate() {
            let mut cursor = int_offsets[index];
            for (slot, symbol) in import.symbols.iter().enumerate() {
                let value = match (symbol, hint_name_offsets[index][slot]) {
                    (ImportedSymbol::ByOrdinal(ordinal), _) => {
                        ordinal_flag | u64::from(*ordinal)
                    }
                    (ImportedSymbol::ByName { .. }, Some(record)) => {
                        u64::from(base) + record as u64
                    }
                    (ImportedSymbol::ByName { .. }, None) => {
                        return Err(format_error!(
                            "hint/name record was not laid out for a by-name import"
                        ))
                    }
                };
                write_ptr_at(&mut block, &mut cursor, ptr_size, value)?;
            }
        }

        // INT and IAT of the new import carry identical values; the loader
        // rebinds the IAT copy at load time.
        for target in [new_int_offset, new_iat_offset] {
            let mut cursor = target;
            for record in &new_hint_name_offsets {
                write_ptr_at(
                    &mut block,
                    &mut cursor,
                    ptr_size,
                    u64::from(base) + *record as u64,
                )?;
            }
        }

        // DLL names.
        for (index, import) in existing.iter().enumerate() {
            let at = dll_name_offsets[index];
            block[at..at + import.dll.len()].copy_from_slice(import.dll.as_bytes());
        }
        block[new_dll_name_offset..new_dll_name_offset + dll_name.len()]
            .copy_from_slice(dll_name.as_bytes());

        // Hint/name records, existing hints preserved, new hints zero.
        for (index, import) in existing.iter().enumerate() {
            for (slot, symbol) in import.symbols.iter().enumerate() {
                if let (ImportedSymbol::ByName { hint, name }, Some(record)) =
                    (symbol, hint_name_offsets[index][slot])
                {
                    let mut cursor = record;
                    write_le_at::<u16>(&mut block, &mut cursor, *hint)?;
                    block[cursor..cursor + name.len()].copy_from_slice(name.as_bytes());
                }
            }
        }
        for (record, symbol) in new_hint_name_offsets.iter().zip(&new_symbols) {
            if let ImportedSymbol::ByName { name, .. } = symbol {
                let mut cursor = *record;
                write_le_at::<u16>(&mut block, &mut cursor, 0)?;
                block[cursor..cursor + name.len()].copy_from_slice(name.as_bytes());
            }
        }

        let import_dir_offset = self.image().data_directory_offset(directory::IMPORT);
        let iat_dir_offset = self.image().data_directory_offset(directory::IAT);
        let bound_dir_offset = self.image().data_directory_offset(directory::BOUND_IMPORT);
        let load_config_dir_offset = self.image().data_directory_offset(directory::LOAD_CONFIG);

        let buffer = self.buffer_mut();
        buffer.write_bytes(section_file_offset, &block)?;

        // Import Directory: the fresh descriptor table.
        buffer.write_le::<u32>(import_dir_offset, base)?;
        buffer.write_le::<u32>(import_dir_offset + 4, descriptor_table_size as u32)?;

        // IAT Directory: keep covering the original IAT range, grown by the
        // new table; the loader resolves each descriptor's FirstThunk
        // independently, so the new IAT need not lie inside this range.
        if directory_count > directory::IAT {
            match original_iat_directory {
                Some(dir) if dir.virtual_address != 0 => {
                    buffer.write_le::<u32>(iat_dir_offset + 4, dir.size + new_iat_size as u32)?;
                }
                _ => {
                    buffer
                        .write_le::<u32>(iat_dir_offset, base + new_iat_offset as u32)?;
                    buffer.write_le::<u32>(iat_dir_offset + 4, new_iat_size as u32)?;
                }
            }
        }

        // Both of these may hold RVAs into the abandoned descriptor area or
        // cached addresses that no longer resolve.
        if directory_count > directory::BOUND_IMPORT {
            buffer.write_le::<u32>(bound_dir_offset, 0)?;
            buffer.write_le::<u32>(bound_dir_offset + 4, 0)?;
        }
        if directory_count > directory::LOAD_CONFIG {
            buffer.write_le::<u32>(load_config_dir_offset, 0)?;
            buffer.write_le::<u32>(load_config_dir_offset + 4, 0)?;
        }

        self.reload()
    }
}
