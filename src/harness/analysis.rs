//! Static analysis of the final contents of changed files.
//!
//! Produces the `StaticAnalysis` input consumed by the metrics evaluator.
//! Only files touched by the change-set are read, and only from the sandbox.

use crate::core::sandbox::resolve_within;
use crate::harness::generator::test_name;
use crate::harness::model::{Change, StaticAnalysis, TestCategory, TestOutcome, TestStatus};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

const MAX_LINE_LENGTH: usize = 120;

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)\b(password|passwd|pwd|secret|api[_-]?key|access[_-]?key|auth[_-]?token|token|private[_-]?key)\b\s*[:=]\s*['"][^'"\s]{4,}['"]"#,
        r"\bAKIA[0-9A-Z]{16}\b",
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
        r"\bgh[pousr]_[A-Za-z0-9]{36,}\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid secret pattern"))
    .collect()
});

static DANGEROUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bpickle\s*\.\s*loads?\s*\(",
        r"\bmarshal\s*\.\s*loads?\s*\(",
        r"\byaml\s*\.\s*load\s*\(",
        r"\bshell\s*=\s*True\b",
        r"\.innerHTML\s*=",
        r"\bdocument\s*\.\s*write\s*\(",
        r"\bunsafe\s*\{",
        r"\bverify\s*=\s*False\b",
        r"\btempfile\s*\.\s*mktemp\s*\(",
        r"\bhashlib\s*\.\s*(?:md5|sha1)\s*\(",
        r"\bchmod\s*\([^)]*0o?777",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid dangerous pattern"))
    .collect()
});

static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:async\s+)?(?:pub\s+)?(?:def|function|fn)\s+[A-Za-z_]\w*")
        .expect("valid definition regex")
});

static DECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|elif|for|while|case|except|catch|and|or|match)\b|&&|\|\|")
        .expect("valid decision regex")
});

pub fn count_secrets(content: &str) -> usize {
    SECRET_PATTERNS
        .iter()
        .map(|re| re.find_iter(content).count())
        .sum()
}

pub fn count_dangerous(content: &str) -> usize {
    DANGEROUS_PATTERNS
        .iter()
        .map(|re| re.find_iter(content).count())
        .sum()
}

/// Decision points and definitions in one file.
fn decision_profile(content: &str) -> (usize, usize) {
    let code: String = content
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            !t.starts_with('#') && !t.starts_with("//")
        })
        .collect::<Vec<_>>()
        .join("\n");
    (DECISION.find_iter(&code).count(), DEFINITION.find_iter(&code).count())
}

pub fn style_issues(content: &str) -> usize {
    let mut issues = 0;
    let mut tab_indent = false;
    let mut space_indent = false;
    for line in content.lines() {
        if line.chars().count() > MAX_LINE_LENGTH {
            issues += 1;
        }
        if line.ends_with([' ', '\t']) {
            issues += 1;
        }
        if line.starts_with('\t') {
            tab_indent = true;
        } else if line.starts_with("  ") {
            space_indent = true;
        }
    }
    if tab_indent && space_indent {
        issues += 1;
    }
    issues
}

/// Analyze the final state of every path the change-set touched.
pub fn analyze(workspace: &Path, changes: &[Change], outcomes: &[TestOutcome]) -> StaticAnalysis {
    let paths: BTreeSet<&str> = changes.iter().map(Change::path).collect();

    let mut secrets = 0;
    let mut dangerous = 0;
    let mut decisions = 0;
    let mut definitions = 0;
    let mut style = 0;
    let mut analyzed = 0;

    for rel in &paths {
        let Ok(target) = resolve_within(workspace, rel) else {
            continue;
        };
        let Ok(bytes) = fs::read(&target) else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes);
        analyzed += 1;
        secrets += count_secrets(&content);
        dangerous += count_dangerous(&content);
        let (d, defs) = decision_profile(&content);
        decisions += d;
        definitions += defs;
        style += style_issues(&content);
    }

    let complexity = if analyzed == 0 {
        0.0
    } else {
        1.0 + decisions as f64 / definitions.max(1) as f64
    };

    let passed_units: BTreeSet<&str> = outcomes
        .iter()
        .filter(|o| o.category == TestCategory::Unit && o.status == TestStatus::Passed)
        .map(|o| o.name.as_str())
        .collect();
    let covered: BTreeSet<&str> = changes
        .iter()
        .enumerate()
        .filter(|(idx, c)| {
            passed_units.contains(test_name(TestCategory::Unit, *idx, c.path()).as_str())
        })
        .map(|(_, c)| c.path())
        .collect();
    let covered = covered.len();
    let coverage_pct = if paths.is_empty() {
        0.0
    } else {
        covered as f64 * 100.0 / paths.len() as f64
    };

    let analysis = StaticAnalysis {
        security_issue_count: secrets as u32,
        dangerous_pattern_count: dangerous as u32,
        coverage_pct,
        complexity,
        style_issue_count: style as u32,
    };
    debug!(files = analyzed, ?analysis, "static analysis complete");
    analysis
}
