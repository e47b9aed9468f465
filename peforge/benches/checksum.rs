use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use peforge::{compute_checksum, find_code_caves, Image};

fn build_image(size: usize) -> Vec<u8> {
    // A buffer with PE-ish texture: stretches of code bytes interrupted by
    // filler runs, so the cave scanner has realistic work to do.
    let mut data = vec![0u8; size];
    for (index, byte) in data.iter_mut().enumerate() {
        *byte = match index % 512 {
            0..=383 => (index % 251) as u8,
            384..=447 => 0x00,
            _ => 0xCC,
        };
    }
    data
}

fn checksum_benchmark(c: &mut Criterion) {
    let data = build_image(4 * 1024 * 1024);

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("compute_4mib", |b| {
        b.iter(|| compute_checksum(&data, Some(0x148)));
    });
    group.finish();
}

fn cave_scan_benchmark(c: &mut Criterion) {
    // Scan a synthetic single-section image; the section covers the whole
    // textured buffer.
    let body = build_image(4 * 1024 * 1024);

    let mut file = minimal_pe64_with_text_section(body.len() as u32);
    let raw_offset = file.len();
    file.extend_from_slice(&body);
    patch_text_section_raw_offset(&mut file, raw_offset as u32, body.len() as u32);

    let image = Image::parse(&file).expect("synthetic image parses");

    let mut group = c.benchmark_group("codecave");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("scan_4mib", |b| {
        b.iter(|| find_code_caves(&image, &file, 32));
    });
    group.finish();
}

fn minimal_pe64_with_text_section(virtual_size: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 0x400];
    let pe_offset = 0x80usize;
    let coff = pe_offset + 4;
    let opt = coff + 20;
    let table = opt + 240;

    buf[0..2].copy_from_slice(&0x5A4Du16.to_le_bytes());
    buf[0x3C..0x40].copy_from_slice(&(pe_offset as u32).to_le_bytes());
    buf[pe_offset..pe_offset + 4].copy_from_slice(&0x0000_4550u32.to_le_bytes());
    buf[coff..coff + 2].copy_from_slice(&0x8664u16.to_le_bytes());
    buf[coff + 2..coff + 4].copy_from_slice(&1u16.to_le_bytes());
    buf[coff + 16..coff + 18].copy_from_slice(&240u16.to_le_bytes());
    buf[opt..opt + 2].copy_from_slice(&0x020Bu16.to_le_bytes());
    buf[opt + 32..opt + 36].copy_from_slice(&0x1000u32.to_le_bytes());
    buf[opt + 36..opt + 40].copy_from_slice(&0x200u32.to_le_bytes());
    buf[opt + 108..opt + 112].copy_from_slice(&16u32.to_le_bytes());

    buf[table..table + 5].copy_from_slice(b".text");
    buf[table + 8..table + 12].copy_from_slice(&virtual_size.to_le_bytes());
    buf[table + 12..table + 16].copy_from_slice(&0x1000u32.to_le_bytes());

    buf
}

fn patch_text_section_raw_offset(file: &mut [u8], raw_offset: u32, raw_size: u32) {
    let table = 0x80 + 4 + 20 + 240;
    file[table + 16..table + 20].copy_from_slice(&raw_size.to_le_bytes());
    file[table + 20..table + 24].copy_from_slice(&raw_offset.to_le_bytes());
}

criterion_group!(benches, checksum_benchmark, cave_scan_benchmark);
criterion_main!(benches);
