//! Apply file-level changes inside the sandbox workspace.
//!
//! Best-effort batch: every change is attempted and recorded, and a failure
//! never stops later changes. The whole pre-change file content is the only
//! rollback artifact, so restoring is one whole-file write per change
//! regardless of operation type.

use crate::core::error::{ChangeApplicationError, HarnessError};
use crate::core::sandbox::resolve_within;
use crate::harness::model::{Change, ChangeApplicationResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct ChangeApplicator {
    workspace: PathBuf,
}

impl ChangeApplicator {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    pub fn apply(&self, changes: &[Change]) -> Vec<ChangeApplicationResult> {
        changes
            .iter()
            .map(|change| match self.apply_one(change) {
                Ok(backup_content) => {
                    debug!(op = change.kind(), path = change.path(), "change applied");
                    ChangeApplicationResult {
                        change: change.clone(),
                        success: true,
                        backup_content,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(op = change.kind(), path = change.path(), error = %e, "change failed");
                    ChangeApplicationResult {
                        change: change.clone(),
                        success: false,
                        backup_content: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }

    /// Apply one change and return the backup (prior content, `None` if the
    /// file did not exist).
    pub fn apply_one(&self, change: &Change) -> Result<Option<String>, ChangeApplicationError> {
        let rel = change.path();
        let target = resolve_within(&self.workspace, rel)?;
        match change {
            Change::FileEdit { content, .. } => {
                let backup = read_optional(&target, rel)?;
                write_file(&target, rel, content)?;
                Ok(backup)
            }
            Change::FileCreate { content, .. } => {
                if target.exists() {
                    return Err(ChangeApplicationError::AlreadyExists(rel.to_string()));
                }
                write_file(&target, rel, content)?;
                Ok(None)
            }
            Change::FileDelete { .. } => {
                let backup = read_existing(&target, rel)?;
                fs::remove_file(&target).map_err(|e| io_err(rel, e))?;
                Ok(Some(backup))
            }
            Change::LineInsert {
                line_number,
                content,
                ..
            } => {
                let backup = read_existing(&target, rel)?;
                let updated = insert_line(&backup, *line_number, content).ok_or_else(|| {
                    ChangeApplicationError::OutOfRange {
                        path: rel.to_string(),
                        line_number: *line_number,
                        line_count: line_count(&backup),
                    }
                })?;
                write_file(&target, rel, &updated)?;
                Ok(Some(backup))
            }
            Change::LineReplace {
                line_number,
                content,
                ..
            } => {
                let backup = read_existing(&target, rel)?;
                let updated = replace_line(&backup, *line_number, content).ok_or_else(|| {
                    ChangeApplicationError::OutOfRange {
                        path: rel.to_string(),
                        line_number: *line_number,
                        line_count: line_count(&backup),
                    }
                })?;
                write_file(&target, rel, &updated)?;
                Ok(Some(backup))
            }
        }
    }

    /// Undo successful changes in reverse order. Returns how many files were
    /// restored or removed.
    pub fn rollback(&self, results: &[ChangeApplicationResult]) -> Result<usize, HarnessError> {
        let mut restored = 0;
        for result in results.iter().rev().filter(|r| r.success) {
            let rel = result.change.path();
            let target = resolve_within(&self.workspace, rel)?;
            match &result.backup_content {
                Some(content) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, content)?;
                }
                None => match fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
            }
            restored += 1;
        }
        debug!(restored, "rollback complete");
        Ok(restored)
    }
}

pub fn line_count(content: &str) -> usize {
    content.split_inclusive('\n').count()
}

/// Insert `content` so it becomes line `line_number` (valid: 1..=count+1).
fn insert_line(original: &str, line_number: usize, content: &str) -> Option<String> {
    let mut lines: Vec<String> = original.split_inclusive('\n').map(str::to_string).collect();
    if line_number == 0 || line_number > lines.len() + 1 {
        return None;
    }
    let mut new_line = content.to_string();
    if !new_line.ends_with('\n') {
        new_line.push('\n');
    }
    if line_number == lines.len() + 1 {
        if let Some(last) = lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
    }
    lines.insert(line_number - 1, new_line);
    Some(lines.concat())
}

/// Replace line `line_number` (valid: 1..=count), keeping its terminator.
fn replace_line(original: &str, line_number: usize, content: &str) -> Option<String> {
    let mut lines: Vec<String> = original.split_inclusive('\n').map(str::to_string).collect();
    if line_number == 0 || line_number > lines.len() {
        return None;
    }
    let old = &lines[line_number - 1];
    let terminator = if old.ends_with("\r\n") {
        "\r\n"
    } else if old.ends_with('\n') {
        "\n"
    } else {
        ""
    };
    let body = content.trim_end_matches(['\r', '\n']);
    lines[line_number - 1] = format!("{}{}", body, terminator);
    Some(lines.concat())
}

fn io_err(rel: &str, e: std::io::Error) -> ChangeApplicationError {
    ChangeApplicationError::Io {
        path: rel.to_string(),
        message: e.to_string(),
    }
}

fn read_optional(target: &Path, rel: &str) -> Result<Option<String>, ChangeApplicationError> {
    match fs::read_to_string(target) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(rel, e)),
    }
}

fn read_existing(target: &Path, rel: &str) -> Result<String, ChangeApplicationError> {
    if !target.is_file() {
        return Err(ChangeApplicationError::NotFound(rel.to_string()));
    }
    fs::read_to_string(target).map_err(|e| io_err(rel, e))
}

fn write_file(target: &Path, rel: &str, content: &str) -> Result<(), ChangeApplicationError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(rel, e))?;
    }
    fs::write(target, content).map_err(|e| io_err(rel, e))
}
