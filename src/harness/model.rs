//! Data model shared by every stage of a simulation run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// One proposed file-level operation. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    FileEdit {
        path: String,
        content: String,
    },
    FileCreate {
        path: String,
        content: String,
    },
    FileDelete {
        path: String,
    },
    LineInsert {
        path: String,
        line_number: usize,
        content: String,
    },
    LineReplace {
        path: String,
        line_number: usize,
        content: String,
    },
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::FileEdit { path, .. }
            | Change::FileCreate { path, .. }
            | Change::FileDelete { path }
            | Change::LineInsert { path, .. }
            | Change::LineReplace { path, .. } => path,
        }
    }

    /// Content carried by the change; deletes carry none.
    pub fn content(&self) -> Option<&str> {
        match self {
            Change::FileEdit { content, .. }
            | Change::FileCreate { content, .. }
            | Change::LineInsert { content, .. }
            | Change::LineReplace { content, .. } => Some(content),
            Change::FileDelete { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::FileEdit { .. } => "file_edit",
            Change::FileCreate { .. } => "file_create",
            Change::FileDelete { .. } => "file_delete",
            Change::LineInsert { .. } => "line_insert",
            Change::LineReplace { .. } => "line_replace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeApplicationResult {
    pub change: Change,
    pub success: bool,
    /// Whole pre-change file content; `None` when the file did not exist.
    pub backup_content: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    Unit,
    Integration,
    Performance,
    Compatibility,
    Functionality,
    Regression,
    Stress,
    Security,
}

impl TestCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TestCategory::Unit => "unit",
            TestCategory::Integration => "integration",
            TestCategory::Performance => "performance",
            TestCategory::Compatibility => "compatibility",
            TestCategory::Functionality => "functionality",
            TestCategory::Regression => "regression",
            TestCategory::Stress => "stress",
            TestCategory::Security => "security",
        }
    }
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutableKind {
    Script,
    Command,
    Function,
}

/// What a test runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestExecutable {
    /// A script inside the sandbox, run by `interpreter` in its own process.
    Script {
        interpreter: String,
        path: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A shell command run with the sandbox workspace as working directory.
    Command { command: String },
    /// A named callable from the function registry.
    Function {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl TestExecutable {
    pub fn kind(&self) -> ExecutableKind {
        match self {
            TestExecutable::Script { .. } => ExecutableKind::Script,
            TestExecutable::Command { .. } => ExecutableKind::Command,
            TestExecutable::Function { .. } => ExecutableKind::Function,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    pub category: TestCategory,
    pub priority: Priority,
    pub timeout_seconds: u64,
    pub executable: TestExecutable,
}

impl TestSpec {
    pub fn executable_kind(&self) -> ExecutableKind {
        self.executable.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub category: TestCategory,
    pub status: TestStatus,
    /// Seconds.
    pub execution_time: f64,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl TestOutcome {
    pub fn skipped(spec: &TestSpec, reason: &str) -> Self {
        Self {
            name: spec.name.clone(),
            category: spec.category,
            status: TestStatus::Skipped,
            execution_time: 0.0,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    /// Wall-clock seconds.
    pub execution_time: f64,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    pub success_rate: f64,
    pub error_count: u32,
    pub performance_score: f64,
    pub stability_score: f64,
    pub security_score: f64,
    pub code_quality_score: f64,
}

/// Inputs to the code-quality and security scores, derived from the final
/// contents of changed files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticAnalysis {
    pub security_issue_count: u32,
    pub dangerous_pattern_count: u32,
    pub coverage_pct: f64,
    pub complexity: f64,
    pub style_issue_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClonedFile {
    pub sandbox_path: PathBuf,
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackData {
    /// Keyed by path relative to the source root.
    pub cloned_files: BTreeMap<String, ClonedFile>,
    pub applied_changes: Vec<ChangeApplicationResult>,
}

/// Orchestrator states, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStage {
    Init,
    SandboxCreated,
    Cloned,
    Validated,
    ChangesApplied,
    Tested,
    Analyzed,
    Scored,
    Persisted,
    CleanedUp,
}

impl SimulationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            SimulationStage::Init => "init",
            SimulationStage::SandboxCreated => "sandbox_created",
            SimulationStage::Cloned => "cloned",
            SimulationStage::Validated => "validated",
            SimulationStage::ChangesApplied => "changes_applied",
            SimulationStage::Tested => "tested",
            SimulationStage::Analyzed => "analyzed",
            SimulationStage::Scored => "scored",
            SimulationStage::Persisted => "persisted",
            SimulationStage::CleanedUp => "cleaned_up",
        }
    }
}

impl fmt::Display for SimulationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub simulation_id: String,
    pub timestamp: String,
    pub success: bool,
    /// Last pipeline stage completed before the record was persisted.
    pub completed_stage: SimulationStage,
    pub metrics: SimulationMetrics,
    pub logs: Vec<String>,
    pub artifacts: Vec<PathBuf>,
    pub recommendations: Vec<String>,
    pub rollback_data: RollbackData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub simulation_id: String,
    pub timestamp: String,
    pub success: bool,
    pub success_rate: f64,
    pub error_count: u32,
    pub performance_score: f64,
    pub stability_score: f64,
    pub security_score: f64,
    pub code_quality_score: f64,
}
