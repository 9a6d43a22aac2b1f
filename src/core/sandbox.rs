//! Ephemeral sandbox directories.
//!
//! A sandbox is a value: every component receives the paths it works on and
//! nothing changes the process working directory. Layout:
//!
//! ```text
//! <sandbox_root>/sim-<ulid>/
//!     workspace/   cloned source subset + applied changes
//!     artifacts/   per-test output logs
//! ```

use crate::core::error::{ChangeApplicationError, HarnessError};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: String,
    pub root: PathBuf,
    pub workspace: PathBuf,
    pub artifacts: PathBuf,
}

impl Sandbox {
    pub fn create(parent: &Path, simulation_id: &str) -> Result<Self, HarnessError> {
        let dir_name = format!("sim-{}", sanitize_component(simulation_id));
        let root = parent.join(dir_name);
        let workspace = root.join("workspace");
        let artifacts = root.join("artifacts");
        fs::create_dir_all(&workspace)?;
        fs::create_dir_all(&artifacts)?;
        debug!(sandbox = %root.display(), "sandbox created");
        Ok(Self {
            id: simulation_id.to_string(),
            root,
            workspace,
            artifacts,
        })
    }

    pub fn remove(&self) -> Result<(), HarnessError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

/// Map a change path onto `base`. Absolute paths and `..` components are
/// rejected so no operation can leave the sandbox.
pub fn resolve_within(base: &Path, relative: &str) -> Result<PathBuf, ChangeApplicationError> {
    let candidate = Path::new(relative);
    if relative.trim().is_empty() {
        return Err(ChangeApplicationError::InvalidPath(relative.to_string()));
    }
    let mut out = base.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ChangeApplicationError::InvalidPath(relative.to_string()));
            }
        }
    }
    Ok(out)
}

fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Removes the sandbox when dropped unless artifacts are preserved. This is
/// the cleanup path for every exit out of a run, including early returns.
pub struct SandboxGuard {
    sandbox: Sandbox,
    preserve: bool,
}

impl SandboxGuard {
    pub fn new(sandbox: Sandbox, preserve: bool) -> Self {
        Self { sandbox, preserve }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn preserved(&self) -> bool {
        self.preserve
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if self.preserve {
            debug!(sandbox = %self.sandbox.root.display(), "sandbox preserved");
            return;
        }
        if let Err(e) = self.sandbox.remove() {
            warn!(sandbox = %self.sandbox.root.display(), error = %e, "sandbox cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_escape_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::create(tmp.path(), "sim_A").unwrap();

        assert!(resolve_within(&sandbox.workspace, "src/a.py").is_ok());
        assert!(resolve_within(&sandbox.workspace, "./src/a.py").is_ok());
        assert!(matches!(
            resolve_within(&sandbox.workspace, "../outside.py"),
            Err(ChangeApplicationError::InvalidPath(_))
        ));
        assert!(matches!(
            resolve_within(&sandbox.workspace, "/etc/passwd"),
            Err(ChangeApplicationError::InvalidPath(_))
        ));
        assert!(resolve_within(&sandbox.workspace, "").is_err());
    }

    #[test]
    fn guard_removes_sandbox_unless_preserved() {
        let tmp = tempfile::tempdir().unwrap();

        let dropped = Sandbox::create(tmp.path(), "sim_drop").unwrap();
        let dropped_root = dropped.root.clone();
        drop(SandboxGuard::new(dropped, false));
        assert!(!dropped_root.exists());

        let kept = Sandbox::create(tmp.path(), "sim_keep").unwrap();
        let kept_root = kept.root.clone();
        drop(SandboxGuard::new(kept, true));
        assert!(kept_root.join("workspace").is_dir());
    }
}
