mod cli;
mod config;
mod logging;
mod prepare;
mod report;
mod run;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    match cli.command {
        Command::Prepare {
            root,
            protocol,
            skip_data_creation,
            symlink,
        } => prepare::run(&root, &protocol, skip_data_creation, symlink),
        Command::Clean { root } => prepare::clean(&root),
        Command::Evaluate { config } => run::run_from_config(&config),
        Command::Summarize { results, out } => report::run(&results, out.as_deref()),
    }
}
