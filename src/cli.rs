//! CLI struct definitions for the `changesim` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "changesim",
    version = env!("CARGO_PKG_VERSION"),
    about = "Validate proposed code changes in a throwaway sandbox before they touch the real tree."
)]
pub(crate) struct Cli {
    /// Source tree that file selectors are resolved against.
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Directory holding the results database (default: <root>/.changesim).
    #[clap(long, global = true)]
    pub store: Option<PathBuf>,
    /// Config file (default: <root>/changesim.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run a change-set through the full simulation pipeline.
    Run {
        /// JSON array of changes.
        #[clap(long)]
        changes: PathBuf,
        /// JSON array of test specs; omitted means generate from the changes.
        #[clap(long)]
        tests: Option<PathBuf>,
        /// Files, directories or globs to clone into the sandbox (repeatable).
        #[clap(long = "select")]
        select: Vec<String>,
    },
    /// Print a stored simulation result.
    Show {
        /// Simulation id (`sim_<ulid>`).
        id: String,
    },
    /// List recent simulations, newest first.
    History {
        #[clap(long, default_value = "10")]
        limit: usize,
    },
    /// Run only the security scan over a change-set.
    Validate {
        #[clap(long)]
        changes: PathBuf,
    },
    /// Print the effective configuration as TOML.
    Config,
}
