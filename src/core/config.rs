//! Simulation configuration, loaded from `changesim.toml`.
//!
//! Every field has a default so a partial file (or no file at all) is valid.
//! The config is immutable for the duration of one run.

use crate::core::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "changesim.toml";

const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    "abc",
    "asyncio",
    "collections",
    "contextlib",
    "copy",
    "dataclasses",
    "datetime",
    "decimal",
    "enum",
    "functools",
    "hashlib",
    "heapq",
    "itertools",
    "json",
    "logging",
    "math",
    "os",
    "pathlib",
    "random",
    "re",
    "statistics",
    "string",
    "sys",
    "threading",
    "time",
    "typing",
    "unittest",
    "uuid",
];

const DEFAULT_FORBIDDEN_OPERATIONS: &[&str] = &[
    "os.system",
    "os.popen",
    "os.exec",
    "os.spawn",
    "os.fork",
    "subprocess.run",
    "subprocess.call",
    "subprocess.Popen",
    "subprocess.check_output",
    "shutil.rmtree",
    "child_process",
    "eval(",
    "exec(",
];

/// Modules rejected on top of the allow-list when networking is disabled.
pub const NETWORK_MODULES: &[&str] = &[
    "socket",
    "ssl",
    "http",
    "urllib",
    "urllib3",
    "requests",
    "httpx",
    "aiohttp",
    "ftplib",
    "smtplib",
    "telnetlib",
    "net",
    "dgram",
    "axios",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Whole-run budget in seconds.
    pub max_execution_time: u64,
    pub memory_limit_mb: f64,
    pub cpu_limit_percent: f64,
    pub preserve_artifacts: bool,
    pub enable_networking: bool,
    pub allowed_imports: BTreeSet<String>,
    pub forbidden_operations: BTreeSet<String>,
    pub sample_interval_ms: u64,
    /// Parent directory for sandboxes; `None` means the OS temp dir.
    pub sandbox_root: Option<PathBuf>,
    pub default_test_timeout_seconds: u64,
    pub stability_threshold: f64,
    pub security_threshold: f64,
    pub max_output_bytes: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_execution_time: 300,
            memory_limit_mb: 1024.0,
            cpu_limit_percent: 80.0,
            preserve_artifacts: false,
            enable_networking: false,
            allowed_imports: DEFAULT_ALLOWED_IMPORTS.iter().map(|s| s.to_string()).collect(),
            forbidden_operations: DEFAULT_FORBIDDEN_OPERATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sample_interval_ms: 500,
            sandbox_root: None,
            default_test_timeout_seconds: 30,
            stability_threshold: 70.0,
            security_threshold: 70.0,
            max_output_bytes: 64 * 1024,
        }
    }
}

impl SimulationConfig {
    /// Load from an explicit TOML file, or from `<dir>/changesim.toml` when a
    /// directory is given. No file means defaults (not an error).
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let file = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        if !file.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&file)?;
        let config: SimulationConfig = toml::from_str(&content)
            .map_err(|e| HarnessError::ConfigError(format!("{}: {}", file.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.max_execution_time == 0 {
            return Err(HarnessError::ConfigError(
                "max_execution_time must be positive".to_string(),
            ));
        }
        if self.sample_interval_ms == 0 {
            return Err(HarnessError::ConfigError(
                "sample_interval_ms must be positive".to_string(),
            ));
        }
        if self.default_test_timeout_seconds == 0 {
            return Err(HarnessError::ConfigError(
                "default_test_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.memory_limit_mb <= 0.0 || self.cpu_limit_percent <= 0.0 {
            return Err(HarnessError::ConfigError(
                "resource limits must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.max_execution_time)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn sandbox_parent(&self) -> PathBuf {
        self.sandbox_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn to_toml(&self) -> Result<String, HarnessError> {
        toml::to_string_pretty(self).map_err(|e| HarnessError::ConfigError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_closed() {
        let config = SimulationConfig::default();
        config.validate().expect("defaults validate");
        assert!(!config.enable_networking);
        assert!(config.forbidden_operations.contains("subprocess.run"));
        assert!(!config.allowed_imports.contains("subprocess"));
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "max_execution_time = 12\npreserve_artifacts = true\n",
        )
        .unwrap();

        let config = SimulationConfig::load(tmp.path()).expect("load");
        assert_eq!(config.max_execution_time, 12);
        assert!(config.preserve_artifacts);
        assert_eq!(config.sample_interval_ms, 500);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SimulationConfig::load(&tmp.path().join("nope.toml")).expect("load");
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("bad.toml");
        fs::write(&file, "max_execution_time = 0\n").unwrap();
        assert!(matches!(
            SimulationConfig::load(&file),
            Err(HarnessError::ConfigError(_))
        ));
    }
}
