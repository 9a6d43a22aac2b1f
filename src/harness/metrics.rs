//! Score reduction.
//!
//! Every score is clamped to `[0, 100]` after bonuses are applied; the raw
//! formulas can exceed the ceiling.

use crate::core::config::SimulationConfig;
use crate::harness::model::{SimulationMetrics, StaticAnalysis, TestOutcome, TestStatus};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// Pass/fail tallies over a set of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl OutcomeTally {
    pub fn of(outcomes: &[TestOutcome]) -> Self {
        let mut tally = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status {
                TestStatus::Passed => tally.passed += 1,
                TestStatus::Failed => tally.failed += 1,
                TestStatus::Error => tally.errored += 1,
                TestStatus::Skipped => tally.skipped += 1,
            }
        }
        tally
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}

pub struct MetricsEvaluator;

impl MetricsEvaluator {
    /// Fill in rates and scores on top of the resource metrics. `base.error_count`
    /// carries errors counted before testing (failed change applications);
    /// errored tests are added to it.
    pub fn evaluate(
        outcomes: &[TestOutcome],
        base: &SimulationMetrics,
        analysis: &StaticAnalysis,
    ) -> SimulationMetrics {
        let tally = OutcomeTally::of(outcomes);
        let error_count = base.error_count + tally.errored as u32;

        SimulationMetrics {
            execution_time: base.execution_time,
            memory_usage_mb: base.memory_usage_mb,
            cpu_usage_percent: base.cpu_usage_percent,
            success_rate: tally.success_rate(),
            error_count,
            performance_score: performance_score(
                base.execution_time,
                base.memory_usage_mb,
                base.cpu_usage_percent,
            ),
            stability_score: stability_score(tally.failure_rate(), error_count),
            security_score: security_score(
                analysis.security_issue_count,
                analysis.dangerous_pattern_count,
            ),
            code_quality_score: code_quality_score(
                analysis.coverage_pct,
                analysis.complexity,
                analysis.style_issue_count,
            ),
        }
    }
}

pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return SCORE_MIN;
    }
    raw.clamp(SCORE_MIN, SCORE_MAX)
}

pub fn performance_score(execution_time: f64, memory_mb: f64, cpu_pct: f64) -> f64 {
    let mut score = 100.0
        - ((execution_time - 60.0) / 10.0).max(0.0)
        - ((memory_mb - 500.0) / 50.0).max(0.0)
        - ((cpu_pct - 80.0) / 5.0).max(0.0);
    if execution_time < 10.0 {
        score += 10.0;
    }
    clamp_score(score)
}

pub fn stability_score(failure_rate: f64, error_count: u32) -> f64 {
    let mut score = 100.0 - failure_rate * 60.0 - (error_count as f64 * 5.0).min(30.0);
    if failure_rate == 0.0 && error_count == 0 {
        score += 10.0;
    }
    clamp_score(score)
}

pub fn security_score(security_issues: u32, dangerous_patterns: u32) -> f64 {
    let mut score = 100.0 - 15.0 * security_issues as f64 - 10.0 * dangerous_patterns as f64;
    if security_issues == 0 && dangerous_patterns == 0 {
        score += 10.0;
    }
    clamp_score(score)
}

pub fn code_quality_score(coverage_pct: f64, complexity: f64, style_issues: u32) -> f64 {
    let complexity_penalty = if complexity > 10.0 {
        ((complexity - 10.0) * 2.0).min(20.0)
    } else {
        0.0
    };
    let mut score =
        80.0 + 0.2 * coverage_pct - complexity_penalty - (style_issues as f64 * 2.0).min(15.0);
    if coverage_pct > 80.0 && complexity < 5.0 && style_issues == 0 {
        score += 15.0;
    }
    clamp_score(score)
}

/// Overall verdict for a run that was not rejected by validation.
pub fn passes_thresholds(metrics: &SimulationMetrics, config: &SimulationConfig) -> bool {
    metrics.error_count == 0
        && metrics.stability_score >= config.stability_threshold
        && metrics.security_score >= config.security_threshold
}

/// One line per weak area.
pub fn recommendations(
    metrics: &SimulationMetrics,
    outcomes: &[TestOutcome],
    analysis: &StaticAnalysis,
    config: &SimulationConfig,
) -> Vec<String> {
    let mut out = Vec::new();
    let tally = OutcomeTally::of(outcomes);

    if tally.failed > 0 {
        let names: Vec<&str> = outcomes
            .iter()
            .filter(|o| o.status == TestStatus::Failed)
            .map(|o| o.name.as_str())
            .take(5)
            .collect();
        out.push(format!(
            "Fix {} failing test(s): {}",
            tally.failed,
            names.join(", ")
        ));
    }
    if tally.errored > 0 {
        out.push(format!(
            "Investigate {} test(s) that errored or timed out",
            tally.errored
        ));
    }
    if tally.skipped > 0 {
        out.push(format!(
            "{} test(s) were skipped; raise max_execution_time or reduce the suite",
            tally.skipped
        ));
    }
    if metrics.stability_score < config.stability_threshold {
        out.push(format!(
            "Stability score {:.1} is below the threshold of {:.1}",
            metrics.stability_score, config.stability_threshold
        ));
    }
    if metrics.security_score < config.security_threshold {
        out.push(format!(
            "Security score {:.1} is below the threshold of {:.1}; review flagged content",
            metrics.security_score, config.security_threshold
        ));
    }
    if analysis.security_issue_count > 0 {
        out.push(format!(
            "Remove {} security issue(s) such as hardcoded secrets or disallowed operations",
            analysis.security_issue_count
        ));
    }
    if analysis.dangerous_pattern_count > 0 {
        out.push(format!(
            "Replace {} dangerous pattern(s) (unsafe deserialization, shell=True, ...)",
            analysis.dangerous_pattern_count
        ));
    }
    if metrics.performance_score < 70.0 {
        out.push(format!(
            "Performance score {:.1}: reduce runtime ({:.1}s), memory ({:.1} MB) or CPU ({:.1}%)",
            metrics.performance_score,
            metrics.execution_time,
            metrics.memory_usage_mb,
            metrics.cpu_usage_percent
        ));
    }
    if analysis.complexity > 10.0 {
        out.push(format!(
            "Reduce complexity (mean {:.1} decision points per definition)",
            analysis.complexity
        ));
    }
    if analysis.style_issue_count > 0 {
        out.push(format!(
            "Clean up {} style issue(s) (long lines, trailing whitespace, mixed indentation)",
            analysis.style_issue_count
        ));
    }
    if metrics.code_quality_score < 70.0 {
        out.push(format!(
            "Code quality score {:.1}: add unit tests covering the changed files",
            metrics.code_quality_score
        ));
    }
    out
}
