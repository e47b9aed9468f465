//! Differential checks: mutated images must still parse under goblin, an
//! independent PE implementation.

mod common;

use common::{build_pe64, build_pe64_with_imports, write_temp};
use peforge::{Patcher, SectionFlags};

#[test]
fn injected_section_is_visible_to_goblin() {
    let tmp = write_temp(&build_pe64());
    let mut patcher = Patcher::open(tmp.path()).unwrap();
    patcher
        .inject_section(".newsec", &[0x11u8; 0x40], SectionFlags::MEM_READ)
        .unwrap();
    patcher.close().unwrap();

    let data = std::fs::read(tmp.path()).unwrap();
    let pe = goblin::pe::PE::parse(&data).expect("goblin accepts the mutated image");

    assert_eq!(pe.header.coff_header.number_of_sections, 3);
    let names: Vec<&str> = pe
        .sections
        .iter()
        .map(|section| section.name().unwrap_or(""))
        .collect();
    assert!(names.contains(&".newsec"));
}

#[test]
fn rewritten_import_table_is_visible_to_goblin() {
    let tmp = write_temp(&build_pe64_with_imports());
    let mut patcher = Patcher::open(tmp.path()).unwrap();
    patcher
        .add_import("user32.dll", &["MessageBoxA".to_string()])
        .unwrap();
    patcher.update_checksum().unwrap();
    patcher.close().unwrap();

    let data = std::fs::read(tmp.path()).unwrap();
    let pe = goblin::pe::PE::parse(&data).expect("goblin accepts the rewritten import table");

    assert!(pe.libraries.contains(&"kernel32.dll"));
    assert!(pe.libraries.contains(&"user32.dll"));
    assert!(pe
        .imports
        .iter()
        .any(|import| import.dll == "user32.dll" && import.name == "MessageBoxA"));
}
