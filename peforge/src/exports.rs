//! Export-table reading and rewriting.
//!
//! Edits never patch the existing table in place: the whole directory is
//! decoded, modified in memory, rebuilt into a fresh `.edata` section and
//! the Export data directory is retargeted. The name-pointer table must stay
//! sorted (the loader binary-searches it), so the rebuilt table is ordered
//! by lowercase name with anonymous ordinal-only exports sorted last.

use serde::Serialize;

use crate::{
    file::io::{read_cstring_at, read_le_at, write_le_at},
    image::{directory, Image, SectionFlags, EXPORT_DIRECTORY_SIZE},
    section::align_up,
    Error::{AlreadyExported, NoExportDirectory, NotFound},
    Patcher, Result,
};

/// A single exported function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    /// Function name; empty for ordinal-only exports
    pub name: String,
    /// Ordinal value (base + address-table index)
    pub ordinal: u16,
    /// RVA of the exported function
    pub rva: u32,
}

/// The decoded export directory.
#[derive(Debug, Clone, Serialize)]
pub struct ExportTable {
    /// Module name the directory advertises
    pub module_name: String,
    /// Ordinal base, normally 1
    pub ordinal_base: u32,
    /// Exported functions
    pub functions: Vec<ExportEntry>,
}

/// Read the export table, or `None` when the image exports nothing.
///
/// # Errors
/// Returns a decode error for a structurally broken directory.
#[allow(clippy::cast_possible_truncation)]
pub fn read_exports(image: &Image, data: &[u8]) -> Result<Option<ExportTable>> {
    let Some(dir) = image.directory(directory::EXPORT) else {
        return Ok(None);
    };

    let dir_offset = image.rva_to_offset(dir.virtual_address)?;

    let mut cursor = dir_offset + 12;
    let name_rva = read_le_at::<u32>(data, &mut cursor)?;
    let ordinal_base = read_le_at::<u32>(data, &mut cursor)?;
    let number_of_functions = read_le_at::<u32>(data, &mut cursor)?;
    let number_of_names = read_le_at::<u32>(data, &mut cursor)?;
    let address_table_rva = read_le_at::<u32>(data, &mut cursor)?;
    let name_pointer_rva = read_le_at::<u32>(data, &mut cursor)?;
    let ordinal_table_rva = read_le_at::<u32>(data, &mut cursor)?;

    let module_name = read_cstring_at(data, image.rva_to_offset(name_rva)?)?;

    let mut address_table = Vec::with_capacity(number_of_functions as usize);
    let mut cursor = image.rva_to_offset(address_table_rva)?;
    for _ in 0..number_of_functions {
        address_table.push(read_le_at::<u32>(data, &mut cursor)?);
    }

    let mut name_pointers = Vec::with_capacity(number_of_names as usize);
    let mut ordinals = Vec::with_capacity(number_of_names as usize);
    if number_of_names > 0 {
        let mut cursor = image.rva_to_offset(name_pointer_rva)?;
        for _ in 0..number_of_names {
            name_pointers.push(read_le_at::<u32>(data, &mut cursor)?);
        }

        let mut cursor = image.rva_to_offset(ordinal_table_rva)?;
        for _ in 0..number_of_names {
            ordinals.push(read_le_at::<u16>(data, &mut cursor)?);
        }
    }

    let mut functions = Vec::new();
    for (index, &rva) in address_table.iter().enumerate() {
        if rva == 0 {
            // Unused slot in the address table.
            continue;
        }

        // The ordinal table maps names onto address-table indices.
        let mut name = String::new();
        for (slot, &ordinal) in ordinals.iter().enumerate() {
            if usize::from(ordinal) == index {
                name = read_cstring_at(data, image.rva_to_offset(name_pointers[slot])?)?;
                break;
            }
        }

        functions.push(ExportEntry {
            name,
            ordinal: (ordinal_base + index as u32) as u16,
            rva,
        });
    }

    Ok(Some(ExportTable {
        module_name,
        ordinal_base,
        functions,
    }))
}

/// Read just the exported names, in name-pointer-table order.
///
/// # Errors
/// Returns a decode error for a structurally broken directory.
pub fn read_export_names(image: &Image, data: &[u8]) -> Result<Vec<String>> {
    match read_exports(image, data)? {
        Some(table) => Ok(table
            .functions
            .into_iter()
            .filter(|f| !f.name.is_empty())
            .map(|f| f.name)
            .collect()),
        None => Ok(Vec::new()),
    }
}

fn sort_for_name_table(functions: &mut [ExportEntry]) {
    // The loader binary-searches the name-pointer table, so named exports
    // are ordered by their lowercase bytes; anonymous exports go last.
    functions.sort_by(|a, b| match (a.name.is_empty(), b.name.is_empty()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
}

#[allow(clippy::cast_possible_truncation)]
fn serialize_export_table(table: &ExportTable, base_rva: u32, size: usize) -> Result<Vec<u8>> {
    let named: Vec<usize> = table
        .functions
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.name.is_empty())
        .map(|(index, _)| index)
        .collect();

    let mut block = vec![0u8; size];

    let address_table_offset = EXPORT_DIRECTORY_SIZE;
    let name_pointer_offset = address_table_offset + table.functions.len() * 4;
    let ordinal_table_offset = name_pointer_offset + named.len() * 4;
    let module_name_offset = ordinal_table_offset + named.len() * 2;

    let mut string_offset = module_name_offset + table.module_name.len() + 1;
    block[module_name_offset..module_name_offset + table.module_name.len()]
        .copy_from_slice(table.module_name.as_bytes());

    // Function name strings, collecting each one's RVA.
    let mut name_rvas = Vec::with_capacity(named.len());
    for &index in &named {
        let name = &table.functions[index].name;
        name_rvas.push(base_rva + string_offset as u32);
        block[string_offset..string_offset + name.len()].copy_from_slice(name.as_bytes());
        string_offset += name.len() + 1;
    }

    // The 40-byte directory header.
    let mut cursor = 0usize;
    write_le_at::<u32>(&mut block, &mut cursor, 0)?; // Characteristics
    write_le_at::<u32>(&mut block, &mut cursor, 0)?; // TimeDateStamp
    write_le_at::<u16>(&mut block, &mut cursor, 0)?; // MajorVersion
    write_le_at::<u16>(&mut block, &mut cursor, 0)?; // MinorVersion
    write_le_at::<u32>(&mut block, &mut cursor, base_rva + module_name_offset as u32)?;
    write_le_at::<u32>(&mut block, &mut cursor, table.ordinal_base)?;
    write_le_at::<u32>(&mut block, &mut cursor, table.functions.len() as u32)?;
    write_le_at::<u32>(&mut block, &mut cursor, named.len() as u32)?;
    write_le_at::<u32>(&mut block, &mut cursor, base_rva + address_table_offset as u32)?;
    write_le_at::<u32>(&mut block, &mut cursor, base_rva + name_pointer_offset as u32)?;
    write_le_at::<u32>(&mut block, &mut cursor, base_rva + ordinal_table_offset as u32)?;

    // Address table.
    let mut cursor = address_table_offset;
    for function in &table.functions {
        write_le_at::<u32>(&mut block, &mut cursor, function.rva)?;
    }

    // Name-pointer table and ordinal table. The ordinal entry is the
    // function's index in the address table, not its ordinal value.
    let mut name_cursor = name_pointer_offset;
    let mut ordinal_cursor = ordinal_table_offset;
    for (slot, &index) in named.iter().enumerate() {
        write_le_at::<u32>(&mut block, &mut name_cursor, name_rvas[slot])?;
        write_le_at::<u16>(&mut block, &mut ordinal_cursor, index as u16)?;
    }

    Ok(block)
}

fn export_table_size(table: &ExportTable) -> usize {
    let named = table
        .functions
        .iter()
        .filter(|f| !f.name.is_empty())
        .count();

    let mut size = EXPORT_DIRECTORY_SIZE;
    size += table.functions.len() * 4; // address table
    size += named * 4; // name-pointer table
    size += named * 2; // ordinal table
    size += table.module_name.len() + 1;
    for function in &table.functions {
        if !function.name.is_empty() {
            size += function.name.len() + 1;
        }
    }

    align_up(size as u64, 16) as usize
}

impl Patcher {
    /// Read the image's export table, or `None` when it exports nothing.
    ///
    /// # Errors
    /// Returns a decode error for a structurally broken directory.
    pub fn exports(&self) -> Result<Option<ExportTable>> {
        read_exports(self.image(), self.buffer().data())
    }

    /// Add an export of `name` resolving to `rva`.
    ///
    /// An image without an export directory gets a fresh one with ordinal
    /// base 1, named after the file.
    ///
    /// # Errors
    /// Returns [`AlreadyExported`] if `name` is already exported.
    pub fn add_export(&mut self, name: &str, rva: u32) -> Result<()> {
        let mut table = match self.exports()? {
            Some(table) => table,
            None => ExportTable {
                module_name: self
                    .buffer()
                    .path()
                    .file_name()
                    .map_or_else(|| "module.dll".to_string(), |n| n.to_string_lossy().into_owned()),
                ordinal_base: 1,
                functions: Vec::new(),
            },
        };

        if table.functions.iter().any(|f| f.name == name) {
            return Err(AlreadyExported(name.to_string()));
        }

        let next_ordinal = table
            .functions
            .iter()
            .map(|f| f.ordinal)
            .max()
            .map_or(table.ordinal_base as u16, |max| max + 1);

        table.functions.push(ExportEntry {
            name: name.to_string(),
            ordinal: next_ordinal,
            rva,
        });

        self.rebuild_export_table(table)
    }

    /// Retarget an existing export at `new_rva`.
    ///
    /// # Errors
    /// Returns [`NoExportDirectory`] when the image exports nothing, or
    /// [`NotFound`] when `name` is not exported.
    pub fn modify_export(&mut self, name: &str, new_rva: u32) -> Result<()> {
        let mut table = self.exports()?.ok_or(NoExportDirectory)?;

        let function = table
            .functions
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| NotFound(name.to_string()))?;
        function.rva = new_rva;

        self.rebuild_export_table(table)
    }

    /// Remove an export by name.
    ///
    /// # Errors
    /// Returns [`NoExportDirectory`] when the image exports nothing, or
    /// [`NotFound`] when `name` is not exported.
    pub fn remove_export(&mut self, name: &str) -> Result<()> {
        let mut table = self.exports()?.ok_or(NoExportDirectory)?;

        let before = table.functions.len();
        table.functions.retain(|f| f.name != name);
        if table.functions.len() == before {
            return Err(NotFound(name.to_string()));
        }

        self.rebuild_export_table(table)
    }

    fn rebuild_export_table(&mut self, mut table: ExportTable) -> Result<()> {
        sort_for_name_table(&mut table.functions);

        let size = export_table_size(&table);

        // Inject zeroed first; the real content needs the section's RVA,
        // which only exists after the injection is reparsed.
        self.inject_section(
            ".edata",
            &vec![0u8; size],
            SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ,
        )?;

        let new_section = self
            .image()
            .sections
            .last()
            .ok_or_else(|| format_error!("image lost its sections across injection"))?;
        let base_rva = new_section.virtual_address;
        let file_offset = new_section.pointer_to_raw_data as usize;

        let block = serialize_export_table(&table, base_rva, size)?;

        let export_dir_offset = self.image().data_directory_offset(directory::EXPORT);

        #[allow(clippy::cast_possible_truncation)]
        let size = size as u32;

        let buffer = self.buffer_mut();
        buffer.write_bytes(file_offset, &block)?;
        buffer.write_le::<u32>(export_dir_offset, base_rva)?;
        buffer.write_le::<u32>(export_dir_offset + 4, size)?;

        self.reload()
    }
}
