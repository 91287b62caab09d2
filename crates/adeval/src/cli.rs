use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "adeval", about = "Anomaly-detection benchmark evaluator")]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build test instance folders from `<root>/original`.
    Prepare {
        #[arg(long)]
        root: PathBuf,
        #[arg(long, default_value = "artificial")]
        protocol: String,
        /// List sub-cases without writing any folder.
        #[arg(long, default_value_t = false)]
        skip_data_creation: bool,
        #[arg(long, default_value_t = false)]
        symlink: bool,
    },
    /// Remove generated test instance folders.
    Clean {
        #[arg(long)]
        root: PathBuf,
    },
    /// Evaluate every configured method and write results plus a summary.
    Evaluate {
        #[arg(long, default_value = "adeval.yaml")]
        config: PathBuf,
    },
    /// Summarize a results file written by `evaluate`.
    Summarize {
        #[arg(long, default_value = "results.jsonl")]
        results: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
