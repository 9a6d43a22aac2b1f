//! changesim: safe-to-fail change validation.
//!
//! A proposed change-set is cloned into an ephemeral sandbox together with
//! the part of the source tree it touches, scanned for dangerous content,
//! applied, exercised by a generated or supplied test suite, scored, and
//! recorded. The real tree is never written.
//!
//! # Pipeline
//!
//! ```text
//! sandbox -> clone -> validate -> apply -> test -> analyze -> score -> persist -> cleanup
//! ```
//!
//! A security rejection short-circuits before anything is applied. Every run
//! ends in a [`SimulationResult`](harness::model::SimulationResult), even on
//! total failure.
//!
//! # Storage
//!
//! Results live in a SQLite database under the store directory. All access
//! goes through [`DbBroker`](core::broker::DbBroker), which serializes writes
//! in-process and appends an audit line per operation.
//!
//! # Example
//!
//! ```no_run
//! use changesim::{ResultStore, SimulationConfig, SimulationEnvironment};
//! use changesim::harness::model::Change;
//! use std::path::Path;
//!
//! let store = ResultStore::open(Path::new(".changesim"))?;
//! let env = SimulationEnvironment::new(SimulationConfig::default(), Path::new("."), store)?;
//! let result = env.run_simulation(
//!     &[Change::FileCreate { path: "a.py".into(), content: "def f(): return 1".into() }],
//!     None,
//!     &[],
//! );
//! println!("{} success={}", result.simulation_id, result.success);
//! # Ok::<(), changesim::core::error::HarnessError>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: shared primitives (errors, config, sandbox, cancellation, store)
//! - [`harness`]: the pipeline components and the orchestrator

pub mod core;
pub mod harness;

mod cli;

pub use crate::core::config::SimulationConfig;
pub use crate::core::error::HarnessError;
pub use crate::core::store::ResultStore;
pub use crate::harness::environment::SimulationEnvironment;

use crate::cli::{Cli, Command};
use crate::harness::model::{Change, SimulationResult, TestSpec};
use crate::harness::security::SecurityValidator;
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::Path;

const STORE_DIR_NAME: &str = ".changesim";

/// CLI entry point. `Ok(false)` means the command ran but the verdict was
/// negative (failed simulation, rejected change-set).
pub fn run() -> Result<bool, HarnessError> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let store_dir = cli.store.unwrap_or_else(|| root.join(STORE_DIR_NAME));
    let config = SimulationConfig::load(cli.config.as_deref().unwrap_or(root.as_path()))?;

    match cli.command {
        Command::Run {
            changes,
            tests,
            select,
        } => {
            let changes: Vec<Change> = read_json(&changes)?;
            let tests: Option<Vec<TestSpec>> = tests.as_deref().map(read_json::<Vec<TestSpec>>).transpose()?;
            let env = SimulationEnvironment::new(config, &root, ResultStore::open(&store_dir)?)?;
            let result = env.run_simulation(&changes, tests, &select);
            println!("{}", serde_json::to_string_pretty(&result)?);
            print_status(&result);
            Ok(result.success)
        }
        Command::Show { id } => {
            let store = ResultStore::open(&store_dir)?;
            let result = store
                .get(&id)?
                .ok_or_else(|| HarnessError::NotFound(format!("no simulation with id {}", id)))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(true)
        }
        Command::History { limit } => {
            let store = ResultStore::open(&store_dir)?;
            println!("{}", serde_json::to_string_pretty(&store.history(limit)?)?);
            Ok(true)
        }
        Command::Validate { changes } => {
            let changes: Vec<Change> = read_json(&changes)?;
            let report = SecurityValidator::new(&config).validate_changes(&changes);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.ok {
                eprintln!("{} {} change(s) passed", "ok".green().bold(), changes.len());
            } else {
                eprintln!("{} {} issue(s)", "rejected".red().bold(), report.issues.len());
            }
            Ok(report.ok)
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(true)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, HarnessError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        HarnessError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_status(result: &SimulationResult) {
    let verdict = if result.success {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    let m = &result.metrics;
    eprintln!(
        "{} {} [{}] perf {:.0} stab {:.0} sec {:.0} qual {:.0} ({:.0}% passed)",
        verdict,
        result.simulation_id,
        result.completed_stage,
        m.performance_score,
        m.stability_score,
        m.security_score,
        m.code_quality_score,
        m.success_rate * 100.0
    );
    for rec in &result.recommendations {
        eprintln!("  {} {}", "-".dimmed(), rec);
    }
    if let Some(workspace) = result.artifacts.first() {
        eprintln!("  {} {}", "sandbox kept at".dimmed(), workspace.display());
    }
}
