//! Simulation pipeline components.
//!
//! Data flows downward: the orchestrator in [`environment`] composes the
//! others, and no component depends on one listed above it there.

pub mod analysis;
pub mod applicator;
pub mod cloner;
pub mod environment;
pub mod executor;
pub mod functions;
pub mod generator;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod security;
