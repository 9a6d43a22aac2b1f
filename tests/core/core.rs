use changesim::core::broker::DbBroker;
use changesim::core::config::{CONFIG_FILE_NAME, SimulationConfig};
use changesim::core::db;
use changesim::core::error::HarnessError;
use changesim::core::sandbox::{Sandbox, SandboxGuard};
use changesim::core::store::ResultStore;
use changesim::core::time;
use changesim::harness::model::{
    Change, ChangeApplicationResult, ClonedFile, RollbackData, SimulationMetrics, SimulationResult,
    SimulationStage,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn sample_result(id: &str, success: bool) -> SimulationResult {
    let mut cloned_files = BTreeMap::new();
    cloned_files.insert(
        "src/a.py".to_string(),
        ClonedFile {
            sandbox_path: PathBuf::from("/tmp/sim/workspace/src/a.py"),
            digest: "sha256:00".to_string(),
        },
    );
    SimulationResult {
        simulation_id: id.to_string(),
        timestamp: time::now_epoch_z(),
        success,
        completed_stage: SimulationStage::Persisted,
        metrics: SimulationMetrics {
            execution_time: 1.234_567_890_123,
            memory_usage_mb: 12.5,
            cpu_usage_percent: 3.3,
            success_rate: 2.0 / 3.0,
            error_count: 1,
            performance_score: 100.0,
            stability_score: 75.1,
            security_score: 0.1 + 0.2,
            code_quality_score: 80.0,
        },
        logs: vec!["[init] started".to_string(), "[tested] 3 test(s)".to_string()],
        artifacts: vec![],
        recommendations: vec!["Fix 1 failing test(s): unit_00_a_py".to_string()],
        rollback_data: RollbackData {
            cloned_files,
            applied_changes: vec![ChangeApplicationResult {
                change: Change::LineReplace {
                    path: "src/a.py".to_string(),
                    line_number: 1,
                    content: "x = 2".to_string(),
                },
                success: true,
                backup_content: Some("x = 1\n".to_string()),
                error: None,
            }],
        },
    }
}

#[test]
fn store_save_then_get_returns_equal_value() {
    let tmp = tempdir().expect("tempdir");
    let store = ResultStore::open(tmp.path()).expect("open store");
    let result = sample_result("sim_01", false);

    store.save(&result).expect("save");
    let loaded = store.get("sim_01").expect("get").expect("present");
    assert_eq!(loaded, result);
}

#[test]
fn unwritable_audit_log_does_not_fail_a_committed_save() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("store.events.jsonl")).expect("block audit log");
    let store = ResultStore::open(tmp.path()).expect("open store");

    store.save(&sample_result("sim_audit", true)).expect("save");
    assert!(store.get("sim_audit").expect("get").is_some());
    assert_eq!(store.count().expect("count"), 1);
}

#[test]
fn store_get_unknown_id_is_none() {
    let tmp = tempdir().expect("tempdir");
    let store = ResultStore::open(tmp.path()).expect("open store");
    assert!(store.get("sim_missing").expect("get").is_none());
}

#[test]
fn store_rejects_duplicate_ids_as_persistence_error() {
    let tmp = tempdir().expect("tempdir");
    let store = ResultStore::open(tmp.path()).expect("open store");
    let result = sample_result("sim_dup", true);
    store.save(&result).expect("first save");
    assert!(matches!(store.save(&result), Err(HarnessError::Persistence(_))));
    assert_eq!(store.count().expect("count"), 1);
}

#[test]
fn history_is_newest_first_and_limited() {
    let tmp = tempdir().expect("tempdir");
    let store = ResultStore::open(tmp.path()).expect("open store");
    for i in 0..5 {
        store
            .save(&sample_result(&format!("sim_{}", i), i % 2 == 0))
            .expect("save");
    }

    let history = store.history(3).expect("history");
    let ids: Vec<&str> = history.iter().map(|s| s.simulation_id.as_str()).collect();
    assert_eq!(ids, vec!["sim_4", "sim_3", "sim_2"]);
    assert!(history[0].success);
    assert_eq!(history[0].error_count, 1);
    assert_eq!(history[0].stability_score, 75.1);
}

#[test]
fn store_survives_reopen() {
    let tmp = tempdir().expect("tempdir");
    {
        let store = ResultStore::open(tmp.path()).expect("open store");
        store.save(&sample_result("sim_durable", true)).expect("save");
    }
    let reopened = ResultStore::open(tmp.path()).expect("reopen");
    assert!(reopened.get("sim_durable").expect("get").is_some());
    assert!(db::results_db_path(tmp.path()).exists());
}

#[test]
fn concurrent_saves_are_serialized() {
    let tmp = tempdir().expect("tempdir");
    let store = Arc::new(ResultStore::open(tmp.path()).expect("open store"));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .save(&sample_result(&format!("sim_t{}", i), true))
                    .expect("save");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }
    assert_eq!(store.count().expect("count"), 8);
}

#[test]
fn broker_audits_every_store_operation() {
    let tmp = tempdir().expect("tempdir");
    let store = ResultStore::open(tmp.path()).expect("open store");
    store.save(&sample_result("sim_audit", true)).expect("save");
    let _ = store.get("sim_audit").expect("get");

    let events = DbBroker::new(tmp.path()).read_audit_log().expect("audit");
    let ops: Vec<&str> = events.iter().map(|e| e.op.as_str()).collect();
    assert!(ops.contains(&"results.init"));
    assert!(ops.contains(&"results.save"));
    assert!(ops.contains(&"results.get"));
    assert!(events.iter().all(|e| e.status == "success"));
}

#[test]
fn db_connect_enables_foreign_keys_and_wal() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("pragmas.db");
    let conn = db::db_connect(&path.to_string_lossy()).expect("connect");
    let fk: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma");
    assert_eq!(fk, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("pragma");
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn config_loads_from_directory_and_round_trips_toml() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join(CONFIG_FILE_NAME),
        "enable_networking = true\nallowed_imports = [\"json\", \"socket\"]\nstability_threshold = 55.0\n",
    )
    .expect("write config");

    let config = SimulationConfig::load(tmp.path()).expect("load");
    assert!(config.enable_networking);
    assert_eq!(config.allowed_imports.len(), 2);
    assert_eq!(config.stability_threshold, 55.0);
    assert_eq!(config.max_execution_time, 300);

    let rendered = config.to_toml().expect("render");
    let reparsed: SimulationConfig = toml::from_str(&rendered).expect("reparse");
    assert_eq!(reparsed, config);
}

#[test]
fn malformed_config_is_a_config_error() {
    let tmp = tempdir().expect("tempdir");
    let file = tmp.path().join("bad.toml");
    fs::write(&file, "max_execution_time = \"soon\"\n").expect("write");
    assert!(matches!(
        SimulationConfig::load(&file),
        Err(HarnessError::ConfigError(_))
    ));
}

#[test]
fn sandbox_guard_cleans_up_on_early_return() {
    let tmp = tempdir().expect("tempdir");
    let root = {
        let sandbox = Sandbox::create(tmp.path(), &time::new_simulation_id()).expect("sandbox");
        let root = sandbox.root.clone();
        let guard = SandboxGuard::new(sandbox, false);
        fs::write(guard.sandbox().workspace.join("f.txt"), "x").expect("write");
        let early: Result<(), HarnessError> = Err(HarnessError::TestExecution("boom".to_string()));
        assert!(early.is_err());
        root
    };
    assert!(!root.exists());
}
