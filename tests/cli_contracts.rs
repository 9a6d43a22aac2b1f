use std::process::{Command, Output};
use tempfile::tempdir;

fn changesim(root: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_changesim"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("CHANGESIM_LOG", "error")
        .output()
        .expect("failed to execute changesim")
}

#[test]
fn show_unknown_id_is_a_not_found_error() {
    let tmp = tempdir().expect("tempdir");
    let output = changesim(tmp.path(), &["show", "sim_01ARZ3NDEKTSV4RRFFQ69G5FAV"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Not found"), "{}", stderr);
    assert!(stderr.contains("sim_01ARZ3NDEKTSV4RRFFQ69G5FAV"), "{}", stderr);
}

#[test]
fn history_of_an_empty_store_is_an_empty_array() {
    let tmp = tempdir().expect("tempdir");
    let output = changesim(tmp.path(), &["history"]);

    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(parsed, serde_json::json!([]));
}
