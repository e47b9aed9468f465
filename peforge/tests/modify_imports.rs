//! The IAT-preserving import rewriter against synthetic images.

mod common;

use common::{
    build_pe32_with_imports, build_pe64, build_pe64_with_imports, data_dir_offset_64, put_u32,
    write_temp,
};
use peforge::{Error, ImportedSymbol, Patcher};

/// Decode the raw descriptor array: (OriginalFirstThunk, TimeDateStamp,
/// ForwarderChain, Name, FirstThunk) per entry.
fn raw_descriptors(patcher: &Patcher) -> Vec<(u32, u32, u32, u32, u32)> {
    let image = patcher.image();
    let dir = image.directory(peforge::directory::IMPORT).unwrap();
    let mut offset = image.rva_to_offset(dir.virtual_address).unwrap();
    let data = patcher.buffer().data();

    let mut descriptors = Vec::new();
    loop {
        let field = |index: usize| {
            u32::from_le_bytes(
                data[offset + index * 4..offset + index * 4 + 4]
                    .try_into()
                    .unwrap(),
            )
        };
        let descriptor = (field(0), field(1), field(2), field(3), field(4));
        if descriptor.0 == 0 && descriptor.3 == 0 && descriptor.4 == 0 {
            break;
        }
        descriptors.push(descriptor);
        offset += 20;
    }
    descriptors
}

#[test]
fn existing_first_thunk_rvas_survive_byte_for_byte() {
    let tmp = write_temp(&build_pe64_with_imports());
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    let before: Vec<u32> = raw_descriptors(&patcher).iter().map(|d| d.4).collect();
    assert_eq!(before, vec![0x2040]);

    patcher
        .add_import("user32.dll", &["MessageBoxA".to_string()])
        .unwrap();

    let after = raw_descriptors(&patcher);
    assert_eq!(after.len(), 2);

    // The kernel32 descriptor still points at the original IAT.
    assert_eq!(after[0].4, 0x2040);

    // Decoded view: original symbols intact, new import appended.
    let imports = patcher.imports().unwrap();
    assert_eq!(imports.len(), 2);

    assert_eq!(imports[0].dll, "kernel32.dll");
    assert_eq!(
        imports[0].symbols,
        vec![
            ImportedSymbol::ByName {
                hint: 5,
                name: "ExitProcess".to_string()
            },
            ImportedSymbol::ByOrdinal(42),
        ]
    );

    assert_eq!(imports[1].dll, "user32.dll");
    assert_eq!(
        imports[1].symbols,
        vec![ImportedSymbol::ByName {
            hint: 0,
            name: "MessageBoxA".to_string()
        }]
    );
}

#[test]
fn import_directory_points_at_the_new_section() {
    let tmp = write_temp(&build_pe64_with_imports());
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    patcher
        .add_import("user32.dll", &["MessageBoxA".to_string()])
        .unwrap();

    let image = patcher.image();
    let new_section = image.sections.last().unwrap();
    assert_eq!(new_section.name_str(), ".idata2");

    let import_dir = image.directory(peforge::directory::IMPORT).unwrap();
    assert_eq!(import_dir.virtual_address, new_section.virtual_address);
    // 1 existing + 1 new + null terminator.
    assert_eq!(import_dir.size, 60);
}

#[test]
fn iat_directory_keeps_covering_the_original_range() {
    let tmp = write_temp(&build_pe64_with_imports());
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    patcher
        .add_import("user32.dll", &["MessageBoxA".to_string()])
        .unwrap();

    let iat_dir = patcher
        .image()
        .directory(peforge::directory::IAT)
        .unwrap();
    assert_eq!(iat_dir.virtual_address, 0x2040);
    // Original 24 bytes plus the new two-slot IAT (16 bytes).
    assert_eq!(iat_dir.size, 40);
}

#[test]
fn stale_binding_directories_are_cleared() {
    let mut data = build_pe64_with_imports();
    // Plant Load Config and Bound Import entries that would dangle after
    // the rewrite.
    put_u32(&mut data, data_dir_offset_64(10), 0x2100);
    put_u32(&mut data, data_dir_offset_64(10) + 4, 0x10);
    put_u32(&mut data, data_dir_offset_64(11), 0x2000);
    put_u32(&mut data, data_dir_offset_64(11) + 4, 0x20);

    let tmp = write_temp(&data);
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    patcher
        .add_import("user32.dll", &["MessageBoxA".to_string()])
        .unwrap();

    assert!(patcher.image().directory(10).is_none());
    assert!(patcher.image().directory(11).is_none());
}

#[test]
fn duplicate_dll_is_rejected_before_any_write() {
    let tmp = write_temp(&build_pe64_with_imports());
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    let before = patcher.buffer().data().to_vec();
    let result = patcher.add_import("kernel32.dll", &["LoadLibraryA".to_string()]);
    assert!(matches!(result, Err(Error::AlreadyImported(dll)) if dll == "kernel32.dll"));
    assert_eq!(patcher.buffer().data(), before.as_slice());
}

#[test]
fn missing_import_directory_is_rejected() {
    let tmp = write_temp(&build_pe64());
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    let result = patcher.add_import("user32.dll", &["MessageBoxA".to_string()]);
    assert!(matches!(result, Err(Error::NoImportDirectory)));
}

#[test]
fn pe32_rewrite_uses_four_byte_thunks() {
    let tmp = write_temp(&build_pe32_with_imports());
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    patcher
        .add_import("user32.dll", &["MessageBoxA".to_string()])
        .unwrap();

    let descriptors = raw_descriptors(&patcher);
    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0].4, 0x2034); // original PE32 IAT RVA

    let imports = patcher.imports().unwrap();
    assert_eq!(imports[0].symbols.len(), 2);
    assert_eq!(imports[0].symbols[1], ImportedSymbol::ByOrdinal(42));
    assert_eq!(
        imports[1].symbols,
        vec![ImportedSymbol::ByName {
            hint: 0,
            name: "MessageBoxA".to_string()
        }]
    );

    // The new descriptor's INT entries are 4 bytes wide: the first thunk of
    // the new import must decode as a plain RVA below the ordinal flag.
    let image = patcher.image();
    let new_int_offset = image.rva_to_offset(descriptors[1].0).unwrap();
    let thunk = u32::from_le_bytes(
        patcher.buffer().data()[new_int_offset..new_int_offset + 4]
            .try_into()
            .unwrap(),
    );
    assert!(thunk != 0 && thunk & 0x8000_0000 == 0);
}

#[test]
fn empty_descriptor_table_still_gains_the_new_import() {
    // An import directory that holds only the null terminator.
    let mut data = build_pe64();
    put_u32(&mut data, data_dir_offset_64(1), 0x2000);
    put_u32(&mut data, data_dir_offset_64(1) + 4, 20);

    let tmp = write_temp(&data);
    let mut patcher = Patcher::open(tmp.path()).unwrap();

    patcher
        .add_import("user32.dll", &["MessageBoxA".to_string()])
        .unwrap();

    let imports = patcher.imports().unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].dll, "user32.dll");

    let import_dir = patcher
        .image()
        .directory(peforge::directory::IMPORT)
        .unwrap();
    assert_eq!(import_dir.size, 40); // new descriptor + null terminator
}
