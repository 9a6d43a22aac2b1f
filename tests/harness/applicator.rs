use changesim::harness::applicator::{ChangeApplicator, line_count};
use changesim::harness::model::Change;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn seed(ws: &Path) {
    fs::create_dir_all(ws.join("pkg")).expect("mkdir");
    fs::write(ws.join("pkg/mod.py"), "import os\r\n\r\ndef f():\r\n    return 1\r\n").expect("seed");
    fs::write(ws.join("notes.txt"), "no trailing newline").expect("seed");
    fs::write(ws.join("data.bin.txt"), "line1\nline2\nline3\n").expect("seed");
}

fn snapshot(ws: &Path, rel: &str) -> Option<Vec<u8>> {
    fs::read(ws.join(rel)).ok()
}

#[test]
fn edit_and_delete_round_trip_byte_for_byte() {
    let tmp = tempdir().expect("tempdir");
    let ws = tmp.path();
    seed(ws);
    let before_mod = snapshot(ws, "pkg/mod.py");
    let before_notes = snapshot(ws, "notes.txt");

    let applicator = ChangeApplicator::new(ws);
    let results = applicator.apply(&[
        Change::FileEdit {
            path: "pkg/mod.py".to_string(),
            content: "def g():\n    return 2\n".to_string(),
        },
        Change::FileDelete {
            path: "notes.txt".to_string(),
        },
    ]);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(
        results[0].backup_content.as_deref().map(str::as_bytes),
        before_mod.as_deref()
    );
    assert!(!ws.join("notes.txt").exists());

    applicator.rollback(&results).expect("rollback");
    assert_eq!(snapshot(ws, "pkg/mod.py"), before_mod);
    assert_eq!(snapshot(ws, "notes.txt"), before_notes);
}

#[test]
fn stacked_changes_to_one_file_roll_back_to_the_original() {
    let tmp = tempdir().expect("tempdir");
    let ws = tmp.path();
    seed(ws);
    let original = snapshot(ws, "data.bin.txt");

    let applicator = ChangeApplicator::new(ws);
    let results = applicator.apply(&[
        Change::LineInsert {
            path: "data.bin.txt".to_string(),
            line_number: 1,
            content: "header".to_string(),
        },
        Change::LineReplace {
            path: "data.bin.txt".to_string(),
            line_number: 4,
            content: "LINE3".to_string(),
        },
        Change::FileEdit {
            path: "data.bin.txt".to_string(),
            content: "rewritten\n".to_string(),
        },
    ]);
    assert!(results.iter().all(|r| r.success), "{:?}", results);
    assert_eq!(
        results[1].backup_content.as_deref(),
        Some("header\nline1\nline2\nline3\n")
    );

    applicator.rollback(&results).expect("rollback");
    assert_eq!(snapshot(ws, "data.bin.txt"), original);
}

#[test]
fn failed_change_does_not_stop_the_batch() {
    let tmp = tempdir().expect("tempdir");
    let ws = tmp.path();
    seed(ws);

    let applicator = ChangeApplicator::new(ws);
    let results = applicator.apply(&[
        Change::FileCreate {
            path: "first.py".to_string(),
            content: "A = 1\n".to_string(),
        },
        Change::LineReplace {
            path: "data.bin.txt".to_string(),
            line_number: 99,
            content: "nope".to_string(),
        },
        Change::FileCreate {
            path: "third.py".to_string(),
            content: "C = 3\n".to_string(),
        },
    ]);

    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[2].success);
    let err = results[1].error.as_deref().expect("error text");
    assert!(err.starts_with("OutOfRange"), "{}", err);
    assert!(err.contains("line 99"));
    assert_eq!(
        fs::read_to_string(ws.join("data.bin.txt")).expect("read"),
        "line1\nline2\nline3\n"
    );
    assert!(ws.join("first.py").exists());
    assert!(ws.join("third.py").exists());
}

#[test]
fn per_variant_preconditions() {
    let tmp = tempdir().expect("tempdir");
    let ws = tmp.path();
    seed(ws);
    let applicator = ChangeApplicator::new(ws);

    let results = applicator.apply(&[
        Change::FileCreate {
            path: "notes.txt".to_string(),
            content: "clobber".to_string(),
        },
        Change::FileDelete {
            path: "absent.txt".to_string(),
        },
        Change::LineInsert {
            path: "absent.txt".to_string(),
            line_number: 1,
            content: "x".to_string(),
        },
        Change::LineInsert {
            path: "notes.txt".to_string(),
            line_number: 3,
            content: "x".to_string(),
        },
        Change::FileEdit {
            path: "fresh/dir/new.py".to_string(),
            content: "N = 1\n".to_string(),
        },
    ]);

    let errors: Vec<Option<&str>> = results.iter().map(|r| r.error.as_deref()).collect();
    assert!(errors[0].unwrap().starts_with("AlreadyExists"));
    assert!(errors[1].unwrap().starts_with("NotFound"));
    assert!(errors[2].unwrap().starts_with("NotFound"));
    assert!(errors[3].unwrap().starts_with("OutOfRange"));
    assert!(errors[4].is_none());
    assert!(results[4].backup_content.is_none());
    assert_eq!(fs::read_to_string(ws.join("notes.txt")).unwrap(), "no trailing newline");
    assert_eq!(fs::read_to_string(ws.join("fresh/dir/new.py")).unwrap(), "N = 1\n");
}

#[test]
fn insert_at_end_of_unterminated_file_appends_a_line() {
    let tmp = tempdir().expect("tempdir");
    let ws = tmp.path();
    seed(ws);
    assert_eq!(line_count("no trailing newline"), 1);

    let applicator = ChangeApplicator::new(ws);
    let results = applicator.apply(&[Change::LineInsert {
        path: "notes.txt".to_string(),
        line_number: 2,
        content: "second".to_string(),
    }]);
    assert!(results[0].success);
    assert_eq!(
        fs::read_to_string(ws.join("notes.txt")).unwrap(),
        "no trailing newline\nsecond\n"
    );
}

#[test]
fn rollback_skips_failed_changes() {
    let tmp = tempdir().expect("tempdir");
    let ws = tmp.path();
    seed(ws);
    let applicator = ChangeApplicator::new(ws);
    let results = applicator.apply(&[
        Change::FileCreate {
            path: "notes.txt".to_string(),
            content: "clobber".to_string(),
        },
        Change::FileCreate {
            path: "made.py".to_string(),
            content: "M = 1\n".to_string(),
        },
    ]);
    assert_eq!(applicator.rollback(&results).expect("rollback"), 1);
    assert!(ws.join("notes.txt").exists());
    assert!(!ws.join("made.py").exists());
}
