use changesim::core::config::SimulationConfig;
use changesim::harness::metrics::{
    MetricsEvaluator, code_quality_score, passes_thresholds, performance_score, recommendations,
    security_score, stability_score,
};
use changesim::harness::model::{
    SimulationMetrics, StaticAnalysis, TestCategory, TestOutcome, TestStatus,
};

fn outcome(name: &str, status: TestStatus) -> TestOutcome {
    TestOutcome {
        name: name.to_string(),
        category: TestCategory::Unit,
        status,
        execution_time: 0.01,
        stdout: String::new(),
        stderr: String::new(),
        error: None,
    }
}

fn in_range(v: f64) -> bool {
    (0.0..=100.0).contains(&v)
}

#[test]
fn scores_stay_bounded_for_extreme_inputs() {
    let extremes = [0.0, 1e-9, 5.0, 9.999, 10.0, 60.0, 500.0, 1e6, 1e12, f64::MAX];
    for &t in &extremes {
        for &m in &extremes {
            for &c in &extremes {
                assert!(in_range(performance_score(t, m, c)), "perf({}, {}, {})", t, m, c);
            }
        }
    }
    for rate in [0.0, 0.25, 1.0] {
        for errors in [0, 1, 6, u32::MAX] {
            assert!(in_range(stability_score(rate, errors)));
        }
    }
    for issues in [0, 1, 7, u32::MAX] {
        for patterns in [0, 3, u32::MAX] {
            assert!(in_range(security_score(issues, patterns)));
        }
    }
    for coverage in [0.0, 80.0, 80.1, 100.0, 1e9] {
        for complexity in [0.0, 4.9, 10.0, 25.0, 1e9] {
            for style in [0, 1, 100] {
                assert!(in_range(code_quality_score(coverage, complexity, style)));
            }
        }
    }
}

#[test]
fn performance_bonus_only_under_ten_seconds() {
    assert_eq!(performance_score(9.0, 0.0, 0.0), 100.0);
    assert_eq!(performance_score(10.0, 0.0, 0.0), 100.0);
    // 100 - (80-60)/10
    assert_eq!(performance_score(80.0, 0.0, 0.0), 98.0);
    // 100 - (600-500)/50 - (100-80)/5 + 10
    assert_eq!(performance_score(1.0, 600.0, 100.0), 100.0);
    assert_eq!(performance_score(20.0, 600.0, 100.0), 94.0);
}

#[test]
fn stability_error_penalty_is_capped() {
    assert_eq!(stability_score(0.0, 6), 70.0);
    assert_eq!(stability_score(0.0, 60), 70.0);
    assert_eq!(stability_score(1.0, 60), 10.0);
}

#[test]
fn security_score_penalizes_issues_and_patterns() {
    assert_eq!(security_score(1, 0), 85.0);
    assert_eq!(security_score(0, 1), 90.0);
    assert_eq!(security_score(7, 0), 0.0);
}

#[test]
fn code_quality_bonus_needs_all_three_conditions() {
    // 80 + 0.2*90 + 15 clamps to 100
    assert_eq!(code_quality_score(90.0, 2.0, 0), 100.0);
    // style issue removes the bonus: 80 + 18 - 2
    assert_eq!(code_quality_score(90.0, 2.0, 1), 96.0);
    // 80 + 0 - min(20, 30) - min(15, 20)
    assert_eq!(code_quality_score(0.0, 25.0, 10), 45.0);
}

#[test]
fn evaluate_uses_outcomes_resources_and_analysis() {
    let outcomes = vec![
        outcome("a", TestStatus::Passed),
        outcome("b", TestStatus::Passed),
        outcome("c", TestStatus::Failed),
        outcome("d", TestStatus::Skipped),
    ];
    let base = SimulationMetrics {
        execution_time: 70.0,
        memory_usage_mb: 550.0,
        cpu_usage_percent: 50.0,
        ..SimulationMetrics::default()
    };
    let analysis = StaticAnalysis {
        security_issue_count: 1,
        dangerous_pattern_count: 1,
        coverage_pct: 50.0,
        complexity: 3.0,
        style_issue_count: 0,
    };
    let m = MetricsEvaluator::evaluate(&outcomes, &base, &analysis);

    assert_eq!(m.execution_time, 70.0);
    assert_eq!(m.success_rate, 0.5);
    assert_eq!(m.error_count, 0);
    assert_eq!(m.performance_score, 98.0);
    assert_eq!(m.stability_score, 85.0);
    assert_eq!(m.security_score, 75.0);
    assert_eq!(m.code_quality_score, 90.0);
    assert!(passes_thresholds(&m, &SimulationConfig::default()));
}

#[test]
fn no_tests_is_a_full_success_rate() {
    let m = MetricsEvaluator::evaluate(&[], &SimulationMetrics::default(), &StaticAnalysis::default());
    assert_eq!(m.success_rate, 1.0);
    assert_eq!(m.stability_score, 100.0);
    assert_eq!(m.security_score, 100.0);
}

#[test]
fn recommendations_name_weak_areas() {
    let outcomes = vec![outcome("unit_00_a_py", TestStatus::Failed), outcome("e", TestStatus::Error)];
    let analysis = StaticAnalysis {
        security_issue_count: 3,
        style_issue_count: 2,
        ..StaticAnalysis::default()
    };
    let m = MetricsEvaluator::evaluate(&outcomes, &SimulationMetrics::default(), &analysis);
    let recs = recommendations(&m, &outcomes, &analysis, &SimulationConfig::default());

    assert!(recs.iter().any(|r| r.contains("unit_00_a_py")));
    assert!(recs.iter().any(|r| r.contains("errored")));
    assert!(recs.iter().any(|r| r.contains("Security score")));
    assert!(recs.iter().any(|r| r.contains("style issue")));
    assert!(!passes_thresholds(&m, &SimulationConfig::default()));
}
