//! driftsync CLI Binary

use anyhow::Context;
use clap::Parser;
use driftsync::logging::init_logging;
use driftsync::tooling::cli::{Cli, CliContext};
use std::process;

fn run() -> anyhow::Result<String> {
    let cli = Cli::parse();
    let context = CliContext::new(&cli).context("Error initializing driftsync")?;
    init_logging(&context.config().logging, Some(context.root())).context("Error initializing logging")?;
    Ok(context.execute(&cli.command)?)
}

fn main() {
    match run() {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
