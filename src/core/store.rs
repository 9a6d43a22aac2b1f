//! Durable record of simulation runs.
//!
//! Each run is one row in `simulations.db`, inserted once and never updated.
//! Lookups return owned copies; history is ordered newest-first.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::HarnessError;
use crate::core::schemas;
use crate::core::time;
use crate::harness::model::{Change, SimulationResult, SimulationSummary};
use rusqlite::{OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ResultStore {
    /// Directory holding the database and the broker audit log.
    pub root: PathBuf,
}

impl ResultStore {
    /// Open (and if needed initialize) the store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, HarnessError> {
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> PathBuf {
        db::results_db_path(&self.root)
    }

    fn broker(&self) -> DbBroker {
        DbBroker::new(&self.root)
    }

    fn initialize(&self) -> Result<(), HarnessError> {
        self.broker()
            .with_conn(&self.db_path(), "results.init", |conn| {
                conn.execute(schemas::RESULTS_DB_SCHEMA_SIMULATIONS, [])?;
                conn.execute(schemas::RESULTS_DB_SCHEMA_INDEX, [])?;
                Ok(())
            })
            .map_err(into_persistence)
    }

    /// Insert one run. A second save of the same id is rejected.
    pub fn save(&self, result: &SimulationResult) -> Result<(), HarnessError> {
        let changes: Vec<&Change> = result
            .rollback_data
            .applied_changes
            .iter()
            .map(|r| &r.change)
            .collect();
        let changes_json = serde_json::to_string(&changes)?;
        let result_json = serde_json::to_string(result)?;
        let m = &result.metrics;

        self.broker()
            .with_conn(&self.db_path(), "results.save", |conn| {
                conn.execute(
                    "INSERT INTO simulations(simulation_id, ts, recorded_at_ms, success, success_rate, error_count,
                        performance_score, stability_score, security_score, code_quality_score, changes_json, result_json)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        result.simulation_id,
                        result.timestamp,
                        time::now_epoch_ms(),
                        result.success,
                        m.success_rate,
                        m.error_count,
                        m.performance_score,
                        m.stability_score,
                        m.security_score,
                        m.code_quality_score,
                        changes_json,
                        result_json,
                    ],
                )?;
                Ok(())
            })
            .map_err(into_persistence)?;
        debug!(simulation_id = %result.simulation_id, "simulation persisted");
        Ok(())
    }

    /// Unknown ids are `Ok(None)`, not errors.
    pub fn get(&self, simulation_id: &str) -> Result<Option<SimulationResult>, HarnessError> {
        let raw: Option<String> = self.broker().with_conn(&self.db_path(), "results.get", |conn| {
            Ok(conn
                .query_row(
                    "SELECT result_json FROM simulations WHERE simulation_id = ?1",
                    params![simulation_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn history(&self, limit: usize) -> Result<Vec<SimulationSummary>, HarnessError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.broker().with_conn(&self.db_path(), "results.history", |conn| {
            let mut stmt = conn.prepare(
                "SELECT simulation_id, ts, success, success_rate, error_count,
                        performance_score, stability_score, security_score, code_quality_score
                 FROM simulations
                 ORDER BY recorded_at_ms DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(SimulationSummary {
                    simulation_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    success: row.get(2)?,
                    success_rate: row.get(3)?,
                    error_count: row.get(4)?,
                    performance_score: row.get(5)?,
                    stability_score: row.get(6)?,
                    security_score: row.get(7)?,
                    code_quality_score: row.get(8)?,
                })
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    pub fn count(&self) -> Result<usize, HarnessError> {
        self.broker().with_conn(&self.db_path(), "results.count", |conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM simulations", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }
}

fn into_persistence(err: HarnessError) -> HarnessError {
    match err {
        HarnessError::Persistence(_) => err,
        other => HarnessError::Persistence(other.to_string()),
    }
}
