//! Copy a requested subset of a source tree into the sandbox workspace.
//!
//! Selectors are exact relative paths, directories (copied recursively) or
//! glob expressions (`*`, `**`, `?`, `[...]`). Cloning is best-effort: a
//! selector that matches nothing is skipped, not an error.

use crate::core::digest::sha256_hex;
use crate::core::error::HarnessError;
use crate::core::sandbox::resolve_within;
use crate::harness::model::ClonedFile;
use rayon::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories never descended into when expanding directory or glob selectors.
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn", "target", "node_modules", "__pycache__"];

pub struct RepositorySnapshotCloner;

impl RepositorySnapshotCloner {
    /// Copy the files matched by `patterns` from `source_root` into
    /// `target_dir`, returning what was actually copied keyed by relative path.
    pub fn clone(
        source_root: &Path,
        target_dir: &Path,
        patterns: &[String],
    ) -> Result<BTreeMap<String, ClonedFile>, HarnessError> {
        fs::create_dir_all(target_dir)?;
        if !source_root.is_dir() {
            debug!(source = %source_root.display(), "source root missing; nothing cloned");
            return Ok(BTreeMap::new());
        }

        let mut selected: BTreeMap<String, PathBuf> = BTreeMap::new();
        for pattern in patterns {
            let before = selected.len();
            expand_selector(source_root, pattern, &mut selected);
            if selected.len() == before {
                debug!(selector = %pattern, "selector matched nothing; skipped");
            }
        }

        let copied: Vec<(String, ClonedFile)> = selected
            .into_par_iter()
            .filter_map(|(rel, src)| match copy_one(&src, target_dir, &rel) {
                Ok(file) => Some((rel, file)),
                Err(e) => {
                    warn!(file = %rel, error = %e, "clone skipped unreadable file");
                    None
                }
            })
            .collect();

        Ok(copied.into_iter().collect())
    }
}

fn expand_selector(root: &Path, pattern: &str, out: &mut BTreeMap<String, PathBuf>) {
    let pattern = pattern.trim().trim_start_matches("./");
    if pattern.is_empty() {
        return;
    }
    if is_glob(pattern) {
        let Some(matcher) = glob_to_regex(pattern) else {
            warn!(selector = %pattern, "invalid glob selector; skipped");
            return;
        };
        for (rel, path) in walk_files(root, root) {
            if matcher.is_match(&rel) {
                out.insert(rel, path);
            }
        }
        return;
    }

    // Exact selectors must stay inside the source root.
    let Ok(candidate) = resolve_within(root, pattern) else {
        warn!(selector = %pattern, "selector escapes source root; skipped");
        return;
    };
    if candidate.is_file() {
        out.insert(relative_key(root, &candidate), candidate);
    } else if candidate.is_dir() {
        for (rel, path) in walk_files(root, &candidate) {
            out.insert(rel, path);
        }
    }
}

fn walk_files(root: &Path, start: &Path) -> Vec<(String, PathBuf)> {
    WalkDir::new(start)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !SKIPPED_DIRS.iter().any(|d| *d == name)
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| (relative_key(root, e.path()), e.path().to_path_buf()))
        .collect()
}

fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn copy_one(src: &Path, target_dir: &Path, rel: &str) -> Result<ClonedFile, HarnessError> {
    let dest = resolve_within(target_dir, rel)
        .map_err(|e| HarnessError::IoError(std::io::Error::other(e.to_string())))?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = fs::read(src)?;
    fs::write(&dest, &bytes)?;
    Ok(ClonedFile {
        sandbox_path: dest,
        digest: sha256_hex(&bytes),
    })
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Translate a glob into an anchored regex over `/`-separated relative paths.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` also matches zero directories.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' {
                        re.push_str("\\\\");
                    } else {
                        re.push(inner);
                    }
                }
                re.push(']');
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}
