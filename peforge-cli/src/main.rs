mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::Cli;

/// Library logs go to stderr so `--json` output on stdout stays clean;
/// `--verbose` raises the level to debug and `RUST_LOG` overrides both.
fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("peforge", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    if !cli.global.json {
        init_logging(cli.global.verbose);
    }

    if cli.patch.patch {
        commands::patch::run(&cli)
    } else {
        commands::analyze::run(&cli)
    }
}
