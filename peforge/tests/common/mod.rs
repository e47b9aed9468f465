//! Shared builders for synthetic PE images.
//!
//! The images are minimal but structurally valid: real DOS/COFF/optional
//! headers, 16 data directories, two sections (`.text` at RVA 0x1000,
//! `.data` at RVA 0x2000) and, depending on the builder, an import table,
//! an export table, a TLS directory or an appended certificate blob laid
//! out inside `.data`.

#![allow(dead_code)]

use std::io::Write;

pub const IMAGE_BASE_64: u64 = 0x1_4000_0000;
pub const IMAGE_BASE_32: u32 = 0x40_0000;

pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn put_str(buf: &mut [u8], offset: usize, value: &str) {
    buf[offset..offset + value.len()].copy_from_slice(value.as_bytes());
}

/// File offset of the optional header in every built image.
pub const OPT_OFFSET: usize = 0x80 + 4 + 20;

/// File offset of the section table in the PE32+ images.
pub const SECTION_TABLE_64: usize = OPT_OFFSET + 112 + 16 * 8;
/// File offset of the section table in the PE32 images.
pub const SECTION_TABLE_32: usize = OPT_OFFSET + 96 + 16 * 8;

/// File offset of data directory `index` in the PE32+ images.
pub fn data_dir_offset_64(index: usize) -> usize {
    OPT_OFFSET + 112 + index * 8
}

/// File offset of data directory `index` in the PE32 images.
pub fn data_dir_offset_32(index: usize) -> usize {
    OPT_OFFSET + 96 + index * 8
}

fn put_section(
    buf: &mut [u8],
    offset: usize,
    name: &[u8],
    virtual_size: u32,
    virtual_address: u32,
    raw_size: u32,
    raw_offset: u32,
    characteristics: u32,
) {
    buf[offset..offset + name.len()].copy_from_slice(name);
    put_u32(buf, offset + 8, virtual_size);
    put_u32(buf, offset + 12, virtual_address);
    put_u32(buf, offset + 16, raw_size);
    put_u32(buf, offset + 20, raw_offset);
    put_u32(buf, offset + 36, characteristics);
}

/// Minimal PE32+ image: `.text` (RVA 0x1000, raw 0x400) and `.data`
/// (RVA 0x2000, raw 0x600), 0x800 bytes.
pub fn build_pe64() -> Vec<u8> {
    let mut buf = vec![0u8; 0x800];

    put_u16(&mut buf, 0, 0x5A4D);
    put_u32(&mut buf, 0x3C, 0x80);
    put_u32(&mut buf, 0x80, 0x0000_4550);

    let coff = 0x84;
    put_u16(&mut buf, coff, 0x8664);
    put_u16(&mut buf, coff + 2, 2);
    put_u16(&mut buf, coff + 16, 112 + 16 * 8);
    put_u16(&mut buf, coff + 18, 0x0022);

    put_u16(&mut buf, OPT_OFFSET, 0x020B);
    put_u32(&mut buf, OPT_OFFSET + 16, 0x1000); // AddressOfEntryPoint
    put_u64(&mut buf, OPT_OFFSET + 24, IMAGE_BASE_64);
    put_u32(&mut buf, OPT_OFFSET + 32, 0x1000); // SectionAlignment
    put_u32(&mut buf, OPT_OFFSET + 36, 0x200); // FileAlignment
    put_u32(&mut buf, OPT_OFFSET + 56, 0x3000); // SizeOfImage
    put_u32(&mut buf, OPT_OFFSET + 60, 0x400); // SizeOfHeaders
    put_u16(&mut buf, OPT_OFFSET + 68, 3); // Subsystem
    put_u32(&mut buf, OPT_OFFSET + 108, 16); // NumberOfRvaAndSizes

    put_section(
        &mut buf,
        SECTION_TABLE_64,
        b".text",
        0x1E0,
        0x1000,
        0x200,
        0x400,
        0x6000_0020,
    );
    put_section(
        &mut buf,
        SECTION_TABLE_64 + 40,
        b".data",
        0x1C0,
        0x2000,
        0x200,
        0x600,
        0xC000_0040,
    );

    buf[0x400] = 0xCC;
    buf[0x401] = 0xC3;

    buf
}

/// Minimal PE32 image with the same section layout as [`build_pe64`].
pub fn build_pe32() -> Vec<u8> {
    let mut buf = vec![0u8; 0x800];

    put_u16(&mut buf, 0, 0x5A4D);
    put_u32(&mut buf, 0x3C, 0x80);
    put_u32(&mut buf, 0x80, 0x0000_4550);

    let coff = 0x84;
    put_u16(&mut buf, coff, 0x014C);
    put_u16(&mut buf, coff + 2, 2);
    put_u16(&mut buf, coff + 16, 96 + 16 * 8);
    put_u16(&mut buf, coff + 18, 0x0102);

    put_u16(&mut buf, OPT_OFFSET, 0x010B);
    put_u32(&mut buf, OPT_OFFSET + 16, 0x1000);
    put_u32(&mut buf, OPT_OFFSET + 28, IMAGE_BASE_32);
    put_u32(&mut buf, OPT_OFFSET + 32, 0x1000);
    put_u32(&mut buf, OPT_OFFSET + 36, 0x200);
    put_u32(&mut buf, OPT_OFFSET + 56, 0x3000);
    put_u32(&mut buf, OPT_OFFSET + 60, 0x400);
    put_u16(&mut buf, OPT_OFFSET + 68, 3);
    put_u32(&mut buf, OPT_OFFSET + 92, 16);

    put_section(
        &mut buf,
        SECTION_TABLE_32,
        b".text",
        0x1E0,
        0x1000,
        0x200,
        0x400,
        0x6000_0020,
    );
    put_section(
        &mut buf,
        SECTION_TABLE_32 + 40,
        b".data",
        0x1C0,
        0x2000,
        0x200,
        0x600,
        0xC000_0040,
    );

    buf
}

/// PE32+ image importing from kernel32.dll: `ExitProcess` by name (hint 5)
/// and ordinal 42. The import structures live in `.data` at RVA 0x2000.
///
/// Layout: descriptors 0x2000, INT 0x2028, IAT 0x2040, DLL name 0x2058,
/// hint/name record 0x2066.
pub fn build_pe64_with_imports() -> Vec<u8> {
    let mut buf = build_pe64();
    let data = 0x600; // file offset of RVA 0x2000

    // Descriptor: OriginalFirstThunk, TimeDateStamp, ForwarderChain, Name,
    // FirstThunk; then the null terminator (already zero).
    put_u32(&mut buf, data, 0x2028);
    put_u32(&mut buf, data + 12, 0x2058);
    put_u32(&mut buf, data + 16, 0x2040);

    // INT: hint/name RVA, ordinal 42, terminator.
    put_u64(&mut buf, data + 0x28, 0x2066);
    put_u64(&mut buf, data + 0x30, 0x8000_0000_0000_0000 | 42);

    // IAT mirrors the INT pre-load.
    put_u64(&mut buf, data + 0x40, 0x2066);
    put_u64(&mut buf, data + 0x48, 0x8000_0000_0000_0000 | 42);

    put_str(&mut buf, data + 0x58, "kernel32.dll");

    put_u16(&mut buf, data + 0x66, 5); // hint
    put_str(&mut buf, data + 0x68, "ExitProcess");

    // Import directory and IAT directory.
    put_u32(&mut buf, data_dir_offset_64(1), 0x2000);
    put_u32(&mut buf, data_dir_offset_64(1) + 4, 40);
    put_u32(&mut buf, data_dir_offset_64(12), 0x2040);
    put_u32(&mut buf, data_dir_offset_64(12) + 4, 24);

    buf
}

/// PE32 sibling of [`build_pe64_with_imports`].
///
/// Layout: descriptors 0x2000, INT 0x2028, IAT 0x2034, DLL name 0x2040,
/// hint/name record 0x204E.
pub fn build_pe32_with_imports() -> Vec<u8> {
    let mut buf = build_pe32();
    let data = 0x600;

    put_u32(&mut buf, data, 0x2028);
    put_u32(&mut buf, data + 12, 0x2040);
    put_u32(&mut buf, data + 16, 0x2034);

    put_u32(&mut buf, data + 0x28, 0x204E);
    put_u32(&mut buf, data + 0x2C, 0x8000_0000 | 42);

    put_u32(&mut buf, data + 0x34, 0x204E);
    put_u32(&mut buf, data + 0x38, 0x8000_0000 | 42);

    put_str(&mut buf, data + 0x40, "kernel32.dll");

    put_u16(&mut buf, data + 0x4E, 5);
    put_str(&mut buf, data + 0x50, "ExitProcess");

    put_u32(&mut buf, data_dir_offset_32(1), 0x2000);
    put_u32(&mut buf, data_dir_offset_32(1) + 4, 40);
    put_u32(&mut buf, data_dir_offset_32(12), 0x2034);
    put_u32(&mut buf, data_dir_offset_32(12) + 4, 12);

    buf
}

/// PE32+ image importing one function (`Probe`) by name from each of the
/// given DLLs.
pub fn build_pe64_importing(dlls: &[&str]) -> Vec<u8> {
    let mut buf = build_pe64();
    let base_rva = 0x2000u32;
    let file_base = 0x600usize;

    let descriptor_bytes = (dlls.len() + 1) * 20;
    let mut offset = descriptor_bytes;

    // Per DLL: INT (2 thunks), IAT (2 thunks), then strings later.
    let mut int_offsets = Vec::new();
    let mut iat_offsets = Vec::new();
    for _ in dlls {
        int_offsets.push(offset);
        offset += 2 * 8;
        iat_offsets.push(offset);
        offset += 2 * 8;
    }

    let mut name_offsets = Vec::new();
    for dll in dlls {
        name_offsets.push(offset);
        offset += dll.len() + 1;
    }

    let mut hint_offsets = Vec::new();
    for _ in dlls {
        if offset % 2 == 1 {
            offset += 1;
        }
        hint_offsets.push(offset);
        offset += 2 + "Probe".len() + 1;
    }

    assert!(
        file_base + offset <= 0x800,
        "import blob exceeds the .data section"
    );

    for (index, dll) in dlls.iter().enumerate() {
        let descriptor = file_base + index * 20;
        put_u32(&mut buf, descriptor, base_rva + int_offsets[index] as u32);
        put_u32(&mut buf, descriptor + 12, base_rva + name_offsets[index] as u32);
        put_u32(&mut buf, descriptor + 16, base_rva + iat_offsets[index] as u32);

        put_u64(
            &mut buf,
            file_base + int_offsets[index],
            u64::from(base_rva + hint_offsets[index] as u32),
        );
        put_u64(
            &mut buf,
            file_base + iat_offsets[index],
            u64::from(base_rva + hint_offsets[index] as u32),
        );

        put_str(&mut buf, file_base + name_offsets[index], dll);
        put_str(&mut buf, file_base + hint_offsets[index] + 2, "Probe");
    }

    put_u32(&mut buf, data_dir_offset_64(1), base_rva);
    put_u32(&mut buf, data_dir_offset_64(1) + 4, descriptor_bytes as u32);

    buf
}

/// PE32+ DLL exporting `Zeta` (RVA 0x1000) and `alpha` (RVA 0x1010) from a
/// module named `demo.dll`. The table lives in `.data` at RVA 0x2000 with
/// its name-pointer table already sorted.
pub fn build_pe64_with_exports() -> Vec<u8> {
    let mut buf = build_pe64();
    let data = 0x600;

    // Export directory.
    put_u32(&mut buf, data + 12, 0x203C); // module name RVA
    put_u32(&mut buf, data + 16, 1); // ordinal base
    put_u32(&mut buf, data + 20, 2); // NumberOfFunctions
    put_u32(&mut buf, data + 24, 2); // NumberOfNames
    put_u32(&mut buf, data + 28, 0x2028); // address table
    put_u32(&mut buf, data + 32, 0x2030); // name-pointer table
    put_u32(&mut buf, data + 36, 0x2038); // ordinal table

    // Address table: index 0 = Zeta, index 1 = alpha.
    put_u32(&mut buf, data + 0x28, 0x1000);
    put_u32(&mut buf, data + 0x2C, 0x1010);

    // Name pointers sorted case-insensitively: alpha, Zeta.
    put_u32(&mut buf, data + 0x30, 0x2045);
    put_u32(&mut buf, data + 0x34, 0x204B);

    // Ordinal table: indices into the address table.
    put_u16(&mut buf, data + 0x38, 1);
    put_u16(&mut buf, data + 0x3A, 0);

    put_str(&mut buf, data + 0x3C, "demo.dll");
    put_str(&mut buf, data + 0x45, "alpha");
    put_str(&mut buf, data + 0x4B, "Zeta");

    put_u32(&mut buf, data_dir_offset_64(0), 0x2000);
    put_u32(&mut buf, data_dir_offset_64(0) + 4, 0x50);

    buf
}

/// PE32+ image with a TLS directory in `.data` at RVA 0x2000 and one
/// existing callback at VA `IMAGE_BASE_64 + 0x1100`. The callback array
/// lives at RVA 0x2080.
pub fn build_pe64_with_tls() -> Vec<u8> {
    let mut buf = build_pe64();
    let data = 0x600;

    put_u64(&mut buf, data, IMAGE_BASE_64 + 0x2100); // StartAddressOfRawData
    put_u64(&mut buf, data + 8, IMAGE_BASE_64 + 0x2110); // EndAddressOfRawData
    put_u64(&mut buf, data + 16, IMAGE_BASE_64 + 0x2120); // AddressOfIndex
    put_u64(&mut buf, data + 24, IMAGE_BASE_64 + 0x2080); // AddressOfCallBacks

    put_u64(&mut buf, data + 0x80, IMAGE_BASE_64 + 0x1100);

    put_u32(&mut buf, data_dir_offset_64(9), 0x2000);
    put_u32(&mut buf, data_dir_offset_64(9) + 4, 40);

    buf
}

/// PE32+ image with a 0x100-byte certificate blob appended at 0x800 and a
/// Security Directory pointing at it. Total size 0x900.
pub fn build_signed_pe64() -> Vec<u8> {
    let mut buf = build_pe64();
    buf.extend(std::iter::repeat(0xEE).take(0x100));

    put_u32(&mut buf, data_dir_offset_64(4), 0x800); // file offset, not RVA
    put_u32(&mut buf, data_dir_offset_64(4) + 4, 0x100);

    buf
}

/// Write `data` into a fresh temp file and return its guard.
pub fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(data).expect("write temp file");
    tmp.flush().expect("flush temp file");
    tmp
}
