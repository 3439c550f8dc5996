//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects and clocks. They operate on
//! in-memory data structures, take timestamps as epoch milliseconds, and
//! return deterministic outputs suitable for tests.

pub mod aggregate;
pub mod autonomy;
pub mod broadcast;
pub mod context;
pub mod evidence;
pub mod factory;
pub mod invariants;
pub mod norms;
pub mod planner;
pub mod selector;
pub mod state_update;
pub mod text;
pub mod types;
