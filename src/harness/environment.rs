//! The simulation orchestrator.
//!
//! One call to [`SimulationEnvironment::run_simulation`] drives a change-set
//! through the pipeline
//!
//! ```text
//! init -> sandbox_created -> cloned -> validated -> changes_applied
//!      -> tested -> analyzed -> scored -> persisted -> cleaned_up
//! ```
//!
//! and always returns a well-formed [`SimulationResult`]. A security
//! rejection stops the pipeline before anything is applied; any other error
//! stops it where it happened. Either way the run is still scored and
//! persisted, and the sandbox is removed (or kept, with
//! `preserve_artifacts`) when the guard drops.

use crate::core::cancel::{CancelToken, RunBudget};
use crate::core::config::SimulationConfig;
use crate::core::error::HarnessError;
use crate::core::sandbox::{Sandbox, SandboxGuard};
use crate::core::store::ResultStore;
use crate::core::time;
use crate::harness::analysis;
use crate::harness::applicator::ChangeApplicator;
use crate::harness::cloner::RepositorySnapshotCloner;
use crate::harness::executor::TestExecutor;
use crate::harness::functions::FunctionRegistry;
use crate::harness::generator::TestGenerator;
use crate::harness::metrics::{self, MetricsEvaluator, OutcomeTally};
use crate::harness::model::{
    Change, ChangeApplicationResult, ClonedFile, RollbackData, SimulationMetrics, SimulationResult,
    SimulationStage, SimulationSummary, StaticAnalysis, TestOutcome, TestSpec,
};
use crate::harness::monitor::ResourceMonitor;
use crate::harness::security::SecurityValidator;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// How a run left the pipeline early.
enum Interruption {
    Rejected(Vec<String>),
    Aborted(String),
    Failed(String),
}

/// Mutable state of one run, owned by the orchestrator call.
struct RunState {
    simulation_id: String,
    stage: SimulationStage,
    logs: Vec<String>,
    guard: Option<SandboxGuard>,
    cloned_files: BTreeMap<String, ClonedFile>,
    applied: Vec<ChangeApplicationResult>,
    outcomes: Vec<TestOutcome>,
    interruption: Option<Interruption>,
}

impl RunState {
    fn new(simulation_id: String) -> Self {
        Self {
            simulation_id,
            stage: SimulationStage::Init,
            logs: Vec::new(),
            guard: None,
            cloned_files: BTreeMap::new(),
            applied: Vec::new(),
            outcomes: Vec::new(),
            interruption: None,
        }
    }

    fn log(&mut self, stage: SimulationStage, message: impl Into<String>) {
        let message = message.into();
        debug!(simulation_id = %self.simulation_id, stage = %stage, "{}", message);
        self.logs.push(format!("[{}] {}", stage, message));
    }

    fn advance(&mut self, stage: SimulationStage, message: impl Into<String>) {
        self.stage = stage;
        self.log(stage, message);
        info!(simulation_id = %self.simulation_id, stage = %stage, "stage complete");
    }

    fn sandbox(&self) -> Option<&Sandbox> {
        self.guard.as_ref().map(SandboxGuard::sandbox)
    }

    fn failed_applications(&self) -> u32 {
        self.applied.iter().filter(|r| !r.success).count() as u32
    }
}

pub struct SimulationEnvironment {
    config: SimulationConfig,
    source_root: PathBuf,
    store: ResultStore,
    registry: FunctionRegistry,
}

impl SimulationEnvironment {
    pub fn new(
        config: SimulationConfig,
        source_root: &Path,
        store: ResultStore,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self {
            config,
            source_root: source_root.to_path_buf(),
            store,
            registry: FunctionRegistry::with_builtins(),
        })
    }

    /// Register an extra callable for `function`-kind tests.
    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Path, &Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.registry.register(name, f);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn history(&self, limit: usize) -> Result<Vec<SimulationSummary>, HarnessError> {
        self.store.history(limit)
    }

    pub fn get(&self, simulation_id: &str) -> Result<Option<SimulationResult>, HarnessError> {
        self.store.get(simulation_id)
    }

    /// Run a change-set. `tests` of `None` or empty means generate a suite
    /// from the changes.
    pub fn run_simulation(
        &self,
        changes: &[Change],
        tests: Option<Vec<TestSpec>>,
        file_selectors: &[String],
    ) -> SimulationResult {
        self.run_simulation_with_cancel(changes, tests, file_selectors, CancelToken::new())
    }

    pub fn run_simulation_with_cancel(
        &self,
        changes: &[Change],
        tests: Option<Vec<TestSpec>>,
        file_selectors: &[String],
        cancel: CancelToken,
    ) -> SimulationResult {
        let budget = RunBudget::new(self.config.run_budget(), cancel);
        let mut state = RunState::new(time::new_simulation_id());
        let timestamp = time::now_epoch_z();
        info!(simulation_id = %state.simulation_id, changes = changes.len(), "simulation started");
        state.log(
            SimulationStage::Init,
            format!(
                "simulation {} started with {} change(s)",
                state.simulation_id,
                changes.len()
            ),
        );

        let mut monitor = ResourceMonitor::new(&self.config);
        if let Err(e) = monitor.start() {
            state.log(SimulationStage::Init, format!("resource monitor unavailable: {}", e));
        }

        if let Err(e) = self.pipeline(&mut state, &budget, changes, tests.as_deref(), file_selectors) {
            self.record_interruption(&mut state, e);
        }

        let mut base = monitor.stop();
        if base.execution_time == 0.0 {
            base.execution_time = budget.elapsed().as_secs_f64();
        }
        base.error_count = state.failed_applications();
        for breach in monitor.breaches() {
            state.log(state.stage, format!("ResourceLimitExceeded: {}", breach));
        }

        let analysis = self.analyze(&mut state, changes);
        let (metrics, success) = self.score(&mut state, &base, &analysis);
        let recommendations = self.recommend(&state, &metrics, &analysis);

        let mut result = SimulationResult {
            simulation_id: state.simulation_id.clone(),
            timestamp,
            success,
            completed_stage: state.stage,
            metrics,
            logs: Vec::new(),
            artifacts: self.collect_artifacts(&state),
            recommendations,
            rollback_data: RollbackData {
                cloned_files: std::mem::take(&mut state.cloned_files),
                applied_changes: std::mem::take(&mut state.applied),
            },
        };

        if state.interruption.is_none() {
            state.stage = SimulationStage::Persisted;
            result.completed_stage = SimulationStage::Persisted;
        }
        state.log(
            SimulationStage::Persisted,
            format!("recording result (success={})", result.success),
        );
        result.logs = state.logs.clone();

        if let Err(e) = self.store.save(&result) {
            error!(simulation_id = %result.simulation_id, error = %e, "failed to persist simulation");
            if result.completed_stage == SimulationStage::Persisted {
                result.completed_stage = SimulationStage::Scored;
            }
            result.logs.push(format!("[{}] {}: {}", SimulationStage::Persisted, e.kind(), e));
        }

        if let Some(guard) = state.guard.take() {
            let root = guard.sandbox().root.clone();
            let preserved = guard.preserved();
            drop(guard);
            debug!(
                simulation_id = %result.simulation_id,
                sandbox = %root.display(),
                preserved,
                "stage {}",
                SimulationStage::CleanedUp
            );
        }

        info!(
            simulation_id = %result.simulation_id,
            success = result.success,
            stage = %result.completed_stage,
            "simulation finished"
        );
        result
    }

    fn pipeline(
        &self,
        state: &mut RunState,
        budget: &RunBudget,
        changes: &[Change],
        tests: Option<&[TestSpec]>,
        file_selectors: &[String],
    ) -> Result<(), HarnessError> {
        budget.check(SimulationStage::SandboxCreated.as_str())?;
        let sandbox = Sandbox::create(&self.config.sandbox_parent(), &state.simulation_id)?;
        state.guard = Some(SandboxGuard::new(sandbox.clone(), self.config.preserve_artifacts));
        state.advance(
            SimulationStage::SandboxCreated,
            format!("sandbox at {}", sandbox.root.display()),
        );

        budget.check(SimulationStage::Cloned.as_str())?;
        state.cloned_files =
            RepositorySnapshotCloner::clone(&self.source_root, &sandbox.workspace, file_selectors)?;
        let cloned = state.cloned_files.len();
        state.advance(
            SimulationStage::Cloned,
            format!("{} file(s) cloned from {} selector(s)", cloned, file_selectors.len()),
        );

        budget.check(SimulationStage::Validated.as_str())?;
        SecurityValidator::new(&self.config)
            .validate_changes(changes)
            .into_result()?;
        state.advance(
            SimulationStage::Validated,
            format!("{} change(s) passed security validation", changes.len()),
        );

        budget.check(SimulationStage::ChangesApplied.as_str())?;
        state.applied = ChangeApplicator::new(&sandbox.workspace).apply(changes);
        let failures: Vec<String> = state
            .applied
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.success)
            .map(|(idx, r)| {
                format!(
                    "change #{} ({} {}) failed: {}",
                    idx + 1,
                    r.change.kind(),
                    r.change.path(),
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        for line in failures {
            state.log(SimulationStage::ChangesApplied, line);
        }
        let applied_ok = state.applied.len() - state.failed_applications() as usize;
        state.advance(
            SimulationStage::ChangesApplied,
            format!("{}/{} change(s) applied", applied_ok, changes.len()),
        );

        budget.check(SimulationStage::Tested.as_str())?;
        let generated;
        let specs = match tests {
            Some(specs) if !specs.is_empty() => specs,
            _ => {
                generated = TestGenerator::new(&self.config).generate(changes);
                state.log(
                    SimulationStage::Tested,
                    format!("generated {} test(s) from the change-set", generated.len()),
                );
                &generated[..]
            }
        };
        let executor = TestExecutor::new(&sandbox, self.registry.clone(), &self.config);
        state.outcomes = executor.run(specs, budget);
        let tally = OutcomeTally::of(&state.outcomes);
        state.advance(
            SimulationStage::Tested,
            format!(
                "{} test(s): {} passed, {} failed, {} error, {} skipped",
                tally.total, tally.passed, tally.failed, tally.errored, tally.skipped
            ),
        );
        budget.check(SimulationStage::Analyzed.as_str())
    }

    fn record_interruption(&self, state: &mut RunState, err: HarnessError) {
        let stage = state.stage;
        match err {
            HarnessError::SecurityViolation(issues) => {
                warn!(simulation_id = %state.simulation_id, issues = issues.len(), "change-set rejected");
                for issue in &issues {
                    state.log(SimulationStage::Validated, format!("SecurityViolation: {}", issue));
                }
                state.interruption = Some(Interruption::Rejected(issues));
            }
            e @ (HarnessError::Cancelled(_) | HarnessError::DeadlineExceeded(_)) => {
                warn!(simulation_id = %state.simulation_id, error = %e, "simulation interrupted");
                state.log(stage, format!("{}: {}", e.kind(), e));
                state.interruption = Some(Interruption::Aborted(e.to_string()));
            }
            e => {
                error!(simulation_id = %state.simulation_id, stage = %stage, error = %e, "simulation failed");
                state.log(stage, format!("{}: {}", e.kind(), e));
                state.interruption = Some(Interruption::Failed(e.to_string()));
            }
        }
    }

    fn analyze(&self, state: &mut RunState, changes: &[Change]) -> StaticAnalysis {
        let analysis = match (&state.interruption, state.sandbox()) {
            (Some(Interruption::Rejected(issues)), _) => StaticAnalysis {
                security_issue_count: issues.len() as u32,
                ..StaticAnalysis::default()
            },
            (_, Some(sandbox)) if state.stage >= SimulationStage::ChangesApplied => {
                analysis::analyze(&sandbox.workspace, changes, &state.outcomes)
            }
            _ => StaticAnalysis::default(),
        };
        if state.interruption.is_none() {
            state.advance(
                SimulationStage::Analyzed,
                format!(
                    "{} security issue(s), {} dangerous pattern(s), coverage {:.1}%",
                    analysis.security_issue_count,
                    analysis.dangerous_pattern_count,
                    analysis.coverage_pct
                ),
            );
        }
        analysis
    }

    fn score(
        &self,
        state: &mut RunState,
        base: &SimulationMetrics,
        analysis: &StaticAnalysis,
    ) -> (SimulationMetrics, bool) {
        let mut metrics = MetricsEvaluator::evaluate(&state.outcomes, base, analysis);
        let success = match &state.interruption {
            None => metrics::passes_thresholds(&metrics, &self.config),
            Some(Interruption::Rejected(_)) => {
                metrics.success_rate = 0.0;
                false
            }
            Some(_) => false,
        };
        let line = format!(
            "performance {:.1}, stability {:.1}, security {:.1}, quality {:.1}, success rate {:.2}",
            metrics.performance_score,
            metrics.stability_score,
            metrics.security_score,
            metrics.code_quality_score,
            metrics.success_rate
        );
        if state.interruption.is_none() {
            state.advance(SimulationStage::Scored, line);
        } else {
            state.log(SimulationStage::Scored, line);
        }
        (metrics, success)
    }

    fn recommend(
        &self,
        state: &RunState,
        metrics: &SimulationMetrics,
        analysis: &StaticAnalysis,
    ) -> Vec<String> {
        let mut out = Vec::new();
        match &state.interruption {
            Some(Interruption::Rejected(issues)) => {
                out.extend(
                    issues
                        .iter()
                        .map(|issue| format!("Resolve security issue before resubmitting: {}", issue)),
                );
                return out;
            }
            Some(Interruption::Aborted(reason)) => {
                out.push(format!("Run did not complete ({}); rerun with a larger budget", reason));
            }
            Some(Interruption::Failed(reason)) => {
                out.push(format!("Run failed during {}: {}", state.stage, reason));
            }
            None => {}
        }
        let failed = state.failed_applications();
        if failed > 0 {
            out.push(format!(
                "{} change(s) could not be applied; check paths and line numbers",
                failed
            ));
        }
        out.extend(metrics::recommendations(metrics, &state.outcomes, analysis, &self.config));
        out
    }

    fn collect_artifacts(&self, state: &RunState) -> Vec<PathBuf> {
        if !self.config.preserve_artifacts {
            return Vec::new();
        }
        let Some(sandbox) = state.sandbox() else {
            return Vec::new();
        };
        let mut out = vec![sandbox.workspace.clone()];
        match fs::read_dir(&sandbox.artifacts) {
            Ok(entries) => {
                let mut logs: Vec<PathBuf> = entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect();
                logs.sort();
                out.extend(logs);
            }
            Err(e) => warn!(dir = %sandbox.artifacts.display(), error = %e, "cannot list artifacts"),
        }
        out
    }
}
