use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Serialized access to the store databases.
///
/// Concurrent simulation runs share one store; every connection is taken
/// under a process-wide lock and each operation is appended to an audit log.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join("store.events.jsonl"),
        }
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(&self, db_path: &Path, op_name: &str, f: F) -> Result<R, error::HarnessError>
    where
        F: FnOnce(&Connection) -> Result<R, error::HarnessError>,
    {
        static DB_LOCK: Mutex<()> = Mutex::new(());
        // A panic in another holder must not wedge the store forever.
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let db_id = db_path.file_name().unwrap_or_default().to_string_lossy().to_string();
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        if let Err(e) = self.log_event(op_name, &db_id, status) {
            warn!(op = op_name, db = %db_id, error = %e, "audit log append failed");
        }

        result
    }

    fn log_event(&self, op: &str, db_id: &str, status: &str) -> Result<(), error::HarnessError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: ulid::Ulid::new().to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::HarnessError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(error::HarnessError::IoError)?;
        Ok(())
    }

    pub fn read_audit_log(&self) -> Result<Vec<BrokerEvent>, error::HarnessError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.audit_log_path)?;
        let mut out = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }
}
