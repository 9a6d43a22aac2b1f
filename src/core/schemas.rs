//! Database schema definitions for the result store.
//!
//! One SQLite database holds every persisted simulation. Rows are inserted
//! once per run and never updated.

pub const RESULTS_DB_NAME: &str = "simulations.db";

pub const RESULTS_DB_SCHEMA_SIMULATIONS: &str = "
    CREATE TABLE IF NOT EXISTS simulations (
        simulation_id TEXT PRIMARY KEY,
        ts TEXT NOT NULL,
        recorded_at_ms INTEGER NOT NULL,
        success INTEGER NOT NULL,
        success_rate REAL NOT NULL,
        error_count INTEGER NOT NULL,
        performance_score REAL NOT NULL,
        stability_score REAL NOT NULL,
        security_score REAL NOT NULL,
        code_quality_score REAL NOT NULL,
        changes_json TEXT NOT NULL, -- JSON array of submitted changes
        result_json TEXT NOT NULL   -- full SimulationResult
    )
";

pub const RESULTS_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_simulations_recorded ON simulations(recorded_at_ms)";
