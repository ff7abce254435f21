//! Orchestrator with clean module layout.
//!
//! This module provides:
//! - `core`: Orchestrator struct and initialization
//! - `tasks`: the periodic sweeps as testable `*_once` functions, plus the
//!   tokio task wiring in `Orchestrator::run`
//! - `tests`: unit tests for the sweeps

pub mod core;
pub mod tasks;

pub use self::core::Orchestrator;
pub use tasks::{
    auto_lock_once, reconcile_once, retention_once, AutoLockReport, ReconcileReport,
    LOCK_TIMEOUT_REASON,
};

#[cfg(test)]
mod tests;
