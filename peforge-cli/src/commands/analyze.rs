use anyhow::Result;
use peforge::{Analyzer, Info, Reader};

use crate::{
    app::Cli,
    output::{print_kv, print_output, Align, TabWriter},
};

pub fn run(cli: &Cli) -> Result<()> {
    let reader = Reader::open(&cli.file)?;
    let info = Analyzer::new(&reader).analyze()?;

    print_output(&info, &cli.global, |info| {
        display_report(info, cli);
    })?;

    if cli.analysis.caves {
        display_caves(&reader, cli)?;
    }

    if cli.analysis.list_imports {
        display_detailed_imports(&reader, cli)?;
    }

    if cli.analysis.deps {
        super::deps::run(cli)?;
    }

    Ok(())
}

fn display_report(info: &Info, cli: &Cli) {
    let checksum = if info.checksum.stored == 0 {
        "not set".to_string()
    } else if info.checksum.valid {
        format!("0x{:08X} (valid)", info.checksum.stored)
    } else {
        format!(
            "0x{:08X} (INVALID, computed 0x{:08X})",
            info.checksum.stored, info.checksum.computed
        )
    };
    let signature = if info.signature.is_signed {
        format!(
            "present ({} bytes at offset 0x{:X})",
            info.signature.size, info.signature.offset
        )
    } else {
        "none".to_string()
    };

    let mut pairs = vec![
        ("File", info.path.clone()),
        ("Size", format!("{} bytes", info.file_size)),
        ("Architecture", info.architecture.clone()),
        ("Subsystem", info.subsystem.clone()),
        ("Entry point", format!("0x{:X}", info.entry_point)),
        ("Image base", format!("0x{:X}", info.image_base)),
        ("Checksum", checksum),
        ("Signature", signature),
    ];
    if info.relocations.has_relocations {
        pairs.push((
            "Relocations",
            format!(
                "{} blocks, {} entries",
                info.relocations.block_count, info.relocations.total_entries
            ),
        ));
    }
    print_kv(&pairs);

    if info.tls.has_tls {
        println!("TLS callbacks: {}", info.tls.callbacks.len());
        for callback in &info.tls.callbacks {
            println!("    0x{callback:X}");
        }
    }

    println!();
    display_sections(info, cli);
    println!();
    display_imports(info, cli);
    display_exports(info, cli);
}

fn display_sections(info: &Info, cli: &Cli) {
    let sections: Vec<_> = info
        .sections
        .iter()
        .filter(|s| !cli.analysis.suspicious_only || s.suspicious)
        .collect();

    if sections.is_empty() {
        if cli.analysis.suspicious_only {
            println!("No suspicious (RWX) sections.");
        }
        return;
    }

    println!("Sections:");
    let mut table = TabWriter::new(vec![
        ("NAME", Align::Left),
        ("VADDR", Align::Right),
        ("VSIZE", Align::Right),
        ("RAW", Align::Right),
        ("PERM", Align::Left),
        ("ENTROPY", Align::Right),
        ("", Align::Left),
    ])
    .indent("  ");

    for section in sections {
        table.row(vec![
            section.name.clone(),
            format!("0x{:X}", section.virtual_address),
            format!("0x{:X}", section.virtual_size),
            format!("0x{:X}", section.raw_size),
            section.permissions.clone(),
            format!("{:.2}", section.entropy),
            if section.suspicious {
                "suspicious".to_string()
            } else {
                String::new()
            },
        ]);
    }
    table.print();
}

fn display_imports(info: &Info, cli: &Cli) {
    if info.imports.is_empty() {
        println!("Imports:  none");
        return;
    }

    println!("Imports:  {} DLLs", info.imports.len());
    for entry in &info.imports {
        println!("  {} ({} functions)", entry.dll, entry.symbols.len());
        if cli.global.verbose {
            for symbol in &entry.symbols {
                println!("      {}", symbol.display_name());
            }
        }
    }
}

fn display_exports(info: &Info, cli: &Cli) {
    if info.exports.is_empty() {
        return;
    }

    println!("Exports:  {} functions", info.exports.len());
    if cli.global.verbose {
        for name in &info.exports {
            println!("      {name}");
        }
    }
}

fn display_caves(reader: &Reader, cli: &Cli) -> Result<()> {
    let caves = reader.code_caves(cli.analysis.min_cave_size);

    print_output(&caves, &cli.global, |caves| {
        if caves.is_empty() {
            println!(
                "\nNo code caves of at least {} bytes.",
                cli.analysis.min_cave_size
            );
            return;
        }

        println!("\nCode caves (min {} bytes):", cli.analysis.min_cave_size);
        let mut table = TabWriter::new(vec![
            ("SECTION", Align::Left),
            ("OFFSET", Align::Right),
            ("RVA", Align::Right),
            ("SIZE", Align::Right),
            ("FILL", Align::Left),
        ])
        .indent("  ");

        for cave in caves {
            table.row(vec![
                cave.section.clone(),
                format!("0x{:X}", cave.offset),
                format!("0x{:X}", cave.rva),
                cave.size.to_string(),
                format!("0x{:02X}", cave.fill_byte),
            ]);
        }
        table.print();
    })
}

fn display_detailed_imports(reader: &Reader, cli: &Cli) -> Result<()> {
    let imports = reader.imports()?;

    print_output(&imports, &cli.global, |imports| {
        println!("\nDetailed imports:");
        for entry in imports {
            println!("  {}", entry.dll);
            for symbol in &entry.symbols {
                println!("      {}", symbol.display_name());
            }
        }
    })
}
