#![forbid(unsafe_code)]

//! eraser: node-level container image hygiene CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("eraser: {e}");
        std::process::exit(1);
    }
}
