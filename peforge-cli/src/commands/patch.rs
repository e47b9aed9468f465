use std::fs;

use anyhow::{bail, Context, Result};
use peforge::{Patcher, SectionFlags};

use crate::{
    app::Cli,
    commands::{parse_hex_rva, parse_permissions},
};

pub fn run(cli: &Cli) -> Result<()> {
    let ops = &cli.patch;

    let has_operation = (ops.section.is_some() && ops.perms.is_some())
        || ops.entry.is_some()
        || ops.inject_section.is_some()
        || ops.add_import.is_some()
        || ops.add_export.is_some()
        || ops.modify_export.is_some()
        || ops.remove_export.is_some()
        || ops.remove_signature
        || ops.add_tls_callback.is_some()
        || ops.inject_cave.is_some();
    if !has_operation {
        bail!("patch mode requires at least one modification flag");
    }

    if ops.backup {
        let backup_path = backup_path_for(&cli.file);
        fs::copy(&cli.file, &backup_path)
            .with_context(|| format!("failed to create backup {}", backup_path.display()))?;
        log::info!("created backup: {}", backup_path.display());
    }

    let mut patcher = Patcher::open(&cli.file)?;
    let mut modified = false;

    if let (Some(section), Some(perms)) = (&ops.section, &ops.perms) {
        let (read, write, execute) = parse_permissions(perms)?;
        log::info!("setting permissions of '{section}' to {perms}");
        patcher.set_section_permissions(section, read, write, execute)?;
        modified = true;
    }

    if let Some(entry) = &ops.entry {
        let rva = parse_hex_rva(entry)?;
        log::info!(
            "changing entry point 0x{:X} -> 0x{rva:X}",
            patcher.entry_point()
        );
        patcher.patch_entry_point(rva)?;
        modified = true;
    }

    if let Some(name) = &ops.inject_section {
        let (read, write, execute) = parse_permissions(&ops.section_perms)?;
        let mut flags = SectionFlags::empty();
        if read {
            flags |= SectionFlags::MEM_READ;
        }
        if write {
            flags |= SectionFlags::MEM_WRITE;
        }
        if execute {
            flags |= SectionFlags::MEM_EXECUTE | SectionFlags::CNT_CODE;
        } else {
            flags |= SectionFlags::CNT_INITIALIZED_DATA;
        }

        log::info!(
            "injecting section '{name}' ({} bytes, {})",
            ops.section_size,
            ops.section_perms
        );
        patcher.inject_section(name, &vec![0u8; ops.section_size as usize], flags)?;
        modified = true;
    }

    if let Some(spec) = &ops.add_import {
        let (dll, functions) = parse_import_spec(spec)?;
        log::info!("adding import {dll} with {} functions", functions.len());
        patcher.add_import(&dll, &functions)?;
        modified = true;
    }

    if let Some(name) = &ops.add_export {
        let rva = export_rva(cli)?;
        log::info!("adding export {name} at 0x{rva:X}");
        patcher.add_export(name, rva)?;
        modified = true;
    }

    if let Some(name) = &ops.modify_export {
        let rva = export_rva(cli)?;
        log::info!("retargeting export {name} at 0x{rva:X}");
        patcher.modify_export(name, rva)?;
        modified = true;
    }

    if let Some(name) = &ops.remove_export {
        log::info!("removing export {name}");
        patcher.remove_export(name)?;
        modified = true;
    }

    if ops.remove_signature {
        let info = patcher.signature_info();
        log::info!(
            "removing signature ({} bytes at 0x{:X}, truncate: {})",
            info.size,
            info.offset,
            ops.truncate_cert
        );
        patcher.remove_signature(ops.truncate_cert)?;
        modified = true;
    }

    if let Some(rva) = &ops.add_tls_callback {
        let rva = parse_hex_rva(rva)?;
        log::info!("prepending TLS callback at 0x{rva:X}");
        patcher.add_tls_callback(rva)?;
        modified = true;
    }

    if let Some(payload_path) = &ops.inject_cave {
        let payload = fs::read(payload_path)
            .with_context(|| format!("failed to read payload {}", payload_path.display()))?;

        // Pick the largest cave that fits the payload plus the return jump.
        let caves = patcher.code_caves(cli.analysis.min_cave_size);
        let Some(cave) = caves
            .iter()
            .filter(|cave| cave.size as usize >= payload.len() + 5)
            .max_by_key(|cave| cave.size)
        else {
            bail!(
                "no code cave fits {} payload bytes plus the 5-byte return jump",
                payload.len()
            );
        };

        log::info!(
            "injecting {} bytes into cave at RVA 0x{:X} in {}",
            payload.len(),
            cave.rva,
            cave.section
        );
        let original = patcher.inject_code_cave_with_jump(cave, &payload, false)?;
        log::info!("original entry point was 0x{original:X}");
        modified = true;
    }

    if modified && ops.update_checksum {
        log::info!("updating PE checksum");
        patcher.update_checksum()?;
    }

    patcher.close()?;
    log::info!("patch complete: {}", cli.file.display());
    Ok(())
}

fn backup_path_for(file: &std::path::Path) -> std::path::PathBuf {
    let mut backup = file.as_os_str().to_owned();
    backup.push(".bak");
    backup.into()
}

fn export_rva(cli: &Cli) -> Result<u32> {
    let Some(rva) = &cli.patch.export_rva else {
        bail!("--export-rva is required for export modifications");
    };
    parse_hex_rva(rva)
}

/// Parse `DLL.dll:Func1,Func2,...` into a DLL name and function list.
fn parse_import_spec(spec: &str) -> Result<(String, Vec<String>)> {
    let Some((dll, functions)) = spec.split_once(':') else {
        bail!("import spec must look like DLL.dll:Func1,Func2");
    };

    if dll.is_empty() {
        bail!("import spec is missing the DLL name");
    }

    let functions: Vec<String> = functions
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    if functions.is_empty() {
        bail!("import spec lists no functions");
    }

    Ok((dll.to_string(), functions))
}
