use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "grader-link",
    about = "Control channel between a reviewer's editor and the grading process",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a running grader; each line on stdin is a trigger
    Connect {
        /// Grader work directory (overrides the configured environment variable)
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Act as the grader: wait for a client and collect one review per id
    Listen {
        /// Directory to bind the control socket in
        #[arg(long)]
        workdir: PathBuf,

        /// Student identifiers to send, in order
        ids: Vec<String>,
    },

    /// Show effective configuration
    Config {
        /// Emit machine-readable JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
