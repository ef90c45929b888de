//! Fuselage CLI — declarative, idempotent system configuration.

use clap::Parser;
use fuselage::cli::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = fuselage::cli::dispatch(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
