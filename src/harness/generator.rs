//! Rule-based test synthesis from change content.
//!
//! Keyword vocabularies switch categories on; the mapping is deterministic so
//! the same change-set always yields the same suite. Every generated spec is a
//! `function` test backed by the built-in registry in `harness::functions`.

use crate::core::config::SimulationConfig;
use crate::core::digest::sha256_hex;
use crate::harness::model::{Change, Priority, TestCategory, TestExecutable, TestSpec};
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PERFORMANCE_VOCAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(thread\w*|async|await|concurren\w*|parallel\w*|pool|mutex|lock|semaphore|cache\w*|caching|lru_cache|memoi[sz]\w*|optimi[sz]\w*|performance|batch\w*|queue|worker\w*)\b",
    )
    .expect("valid performance vocabulary")
});

static INTEGRATION_VOCAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)(^\s*(import|from)\s+\S|\brequire\s*\(|\b(def|class|function|fn|interface|struct)\s+[A-Za-z_]\w*|\b(api|endpoint|route|request|response|client|database|db|sql|query|cursor|session|orm|schema)\b)",
    )
    .expect("valid integration vocabulary")
});

static SECURITY_VOCAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(auth\w*|login|passw(or)?d|secret\w*|token\w*|credential\w*|api[_-]?key|encrypt\w*|decrypt\w*|crypt\w*|hash\w*|hmac|signature|cipher|\bssl\b|\btls\b|\bjwt\b|oauth\w*|permission\w*)",
    )
    .expect("valid security vocabulary")
});

const PERFORMANCE_MAX_BYTES: u64 = 1024 * 1024;
const STRESS_ITERATIONS: u64 = 100;

/// Which keyword-triggered categories apply to one piece of content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryTriggers {
    pub performance: bool,
    pub integration: bool,
    pub security: bool,
}

pub fn classify(content: &str) -> CategoryTriggers {
    CategoryTriggers {
        performance: PERFORMANCE_VOCAB.is_match(content),
        integration: INTEGRATION_VOCAB.is_match(content),
        security: SECURITY_VOCAB.is_match(content),
    }
}

pub struct TestGenerator {
    base_timeout: u64,
}

impl TestGenerator {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            base_timeout: config.default_test_timeout_seconds,
        }
    }

    pub fn generate(&self, changes: &[Change]) -> Vec<TestSpec> {
        let mut specs = Vec::new();

        for (idx, change) in changes.iter().enumerate() {
            let path = change.path();
            let content = change.content().unwrap_or("");
            let touched_later = changes[idx + 1..].iter().any(|c| c.path() == path);

            specs.push(self.spec(
                TestCategory::Unit,
                idx,
                path,
                Priority::High,
                unit_check(change, touched_later),
            ));

            let functionality = match change {
                Change::FileDelete { .. } => function("tree_walkable", json!({})),
                _ => function("brackets_balanced", json!({ "path": path })),
            };
            specs.push(self.spec(TestCategory::Functionality, idx, path, Priority::Medium, functionality));

            let triggers = classify(content);
            if triggers.integration {
                specs.push(self.spec(
                    TestCategory::Integration,
                    idx,
                    path,
                    Priority::Medium,
                    function("definitions_unique", json!({ "path": path })),
                ));
            }
            if triggers.performance {
                specs.push(self.spec(
                    TestCategory::Performance,
                    idx,
                    path,
                    Priority::Medium,
                    function(
                        "file_size_within",
                        json!({ "path": path, "max_bytes": PERFORMANCE_MAX_BYTES }),
                    ),
                ));
                specs.push(self.spec(
                    TestCategory::Stress,
                    idx,
                    path,
                    Priority::Low,
                    function(
                        "repeated_read",
                        json!({ "path": path, "iterations": STRESS_ITERATIONS }),
                    ),
                ));
            }
            if triggers.security {
                specs.push(self.spec(
                    TestCategory::Security,
                    idx,
                    path,
                    Priority::High,
                    function("no_hardcoded_secrets", json!({ "path": path })),
                ));
            }
        }

        specs.push(TestSpec {
            name: "compatibility_utf8_tree".to_string(),
            category: TestCategory::Compatibility,
            priority: Priority::Low,
            timeout_seconds: self.timeout_for(TestCategory::Compatibility),
            executable: function("utf8_tree", json!({})),
        });
        specs.push(TestSpec {
            name: "regression_change_set_consistent".to_string(),
            category: TestCategory::Regression,
            priority: Priority::High,
            timeout_seconds: self.timeout_for(TestCategory::Regression),
            executable: function("change_set_consistent", expected_final_state(changes)),
        });

        specs
    }

    fn spec(
        &self,
        category: TestCategory,
        idx: usize,
        path: &str,
        priority: Priority,
        executable: TestExecutable,
    ) -> TestSpec {
        TestSpec {
            name: test_name(category, idx, path),
            category,
            priority,
            timeout_seconds: self.timeout_for(category),
            executable,
        }
    }

    fn timeout_for(&self, category: TestCategory) -> u64 {
        match category {
            TestCategory::Unit | TestCategory::Functionality | TestCategory::Security => {
                self.base_timeout
            }
            TestCategory::Stress => self.base_timeout.saturating_mul(4),
            _ => self.base_timeout.saturating_mul(2),
        }
    }
}

fn function(name: &str, args: serde_json::Value) -> TestExecutable {
    TestExecutable::Function {
        name: name.to_string(),
        args,
    }
}

fn unit_check(change: &Change, touched_later: bool) -> TestExecutable {
    match change {
        Change::FileDelete { path } => function("file_absent", json!({ "path": path })),
        Change::FileEdit { path, .. } | Change::FileCreate { path, .. } if touched_later => {
            function("file_exists", json!({ "path": path }))
        }
        Change::FileEdit { path, content } | Change::FileCreate { path, content } => function(
            "file_digest",
            json!({ "path": path, "digest": sha256_hex(content.as_bytes()) }),
        ),
        Change::LineInsert { path, content, .. } | Change::LineReplace { path, content, .. } => {
            function(
                "file_contains",
                json!({ "path": path, "needle": content.trim_end_matches(['\r', '\n']) }),
            )
        }
    }
}

/// Present/absent paths after replaying the change-set in order.
fn expected_final_state(changes: &[Change]) -> serde_json::Value {
    let mut state: BTreeMap<&str, bool> = BTreeMap::new();
    for change in changes {
        let present = !matches!(change, Change::FileDelete { .. });
        state.insert(change.path(), present);
    }
    let present: Vec<&str> = state.iter().filter(|(_, p)| **p).map(|(k, _)| *k).collect();
    let absent: Vec<&str> = state.iter().filter(|(_, p)| !**p).map(|(k, _)| *k).collect();
    json!({ "present": present, "absent": absent })
}

/// Name of the generated `category` test for change `idx`.
pub(crate) fn test_name(category: TestCategory, idx: usize, path: &str) -> String {
    format!("{}_{:02}_{}", category, idx, slug(path))
}

/// Path fragment embedded in generated test names.
pub(crate) fn slug(path: &str) -> String {
    let mut out: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    out.truncate(48);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::model::ExecutableKind;

    fn generator() -> TestGenerator {
        TestGenerator::new(&SimulationConfig::default())
    }

    fn categories(specs: &[TestSpec]) -> Vec<TestCategory> {
        specs.iter().map(|s| s.category).collect()
    }

    #[test]
    fn simple_create_gets_baseline_plus_integration() {
        let specs = generator().generate(&[Change::FileCreate {
            path: "a.py".to_string(),
            content: "def f(): return 1".to_string(),
        }]);
        assert_eq!(
            categories(&specs),
            vec![
                TestCategory::Unit,
                TestCategory::Functionality,
                TestCategory::Integration,
                TestCategory::Compatibility,
                TestCategory::Regression,
            ]
        );
        assert!(specs.iter().all(|s| s.executable_kind() == ExecutableKind::Function));
        assert_eq!(specs[0].name, "unit_00_a_py");
    }

    #[test]
    fn vocabulary_triggers_performance_stress_and_security() {
        let specs = generator().generate(&[Change::FileEdit {
            path: "svc/cache.py".to_string(),
            content: "CACHE = {}\nTOKEN_TTL = 30\n".to_string(),
        }]);
        let cats = categories(&specs);
        assert!(cats.contains(&TestCategory::Performance));
        assert!(cats.contains(&TestCategory::Stress));
        assert!(cats.contains(&TestCategory::Security));
        assert!(!cats.contains(&TestCategory::Integration));
    }

    #[test]
    fn huge_base_timeout_saturates_instead_of_overflowing() {
        let config = SimulationConfig {
            default_test_timeout_seconds: u64::MAX / 3,
            ..SimulationConfig::default()
        };
        let specs = TestGenerator::new(&config).generate(&[Change::FileEdit {
            path: "svc/cache.py".to_string(),
            content: "CACHE = {}\n".to_string(),
        }]);
        let stress = specs.iter().find(|s| s.category == TestCategory::Stress).unwrap();
        assert_eq!(stress.timeout_seconds, u64::MAX);
        let compat = specs.iter().find(|s| s.category == TestCategory::Compatibility).unwrap();
        assert_eq!(compat.timeout_seconds, u64::MAX / 3 * 2);
    }

    #[test]
    fn deletes_get_unit_and_functionality_only() {
        let specs = generator().generate(&[Change::FileDelete {
            path: "old.py".to_string(),
        }]);
        assert_eq!(
            categories(&specs),
            vec![
                TestCategory::Unit,
                TestCategory::Functionality,
                TestCategory::Compatibility,
                TestCategory::Regression,
            ]
        );
        match &specs.last().unwrap().executable {
            TestExecutable::Function { args, .. } => {
                assert_eq!(args["absent"], json!(["old.py"]));
            }
            other => panic!("unexpected executable {:?}", other),
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let changes = vec![
            Change::FileCreate {
                path: "a.py".to_string(),
                content: "import json\nclass A: pass\n".to_string(),
            },
            Change::LineInsert {
                path: "a.py".to_string(),
                line_number: 1,
                content: "# header".to_string(),
            },
        ];
        assert_eq!(generator().generate(&changes), generator().generate(&changes));
        let first_unit = &generator().generate(&changes)[0];
        match &first_unit.executable {
            TestExecutable::Function { name, .. } => assert_eq!(name, "file_exists"),
            other => panic!("unexpected executable {:?}", other),
        }
    }
}
