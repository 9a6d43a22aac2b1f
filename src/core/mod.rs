//! Shared primitives for the simulation harness.
//!
//! Errors, configuration, sandbox paths, cancellation and the durable result
//! store live here. Nothing in `core` depends on the pipeline except the
//! store, which persists its data model.

pub mod broker;
pub mod cancel;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod sandbox;
pub mod schemas;
pub mod store;
pub mod time;
