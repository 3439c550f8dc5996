//! Policy-gated orchestration of a small fleet of software agents.
//!
//! Each cycle observes the plan tree, evidence log, agent statuses and recent
//! history, asks a planning LLM for high-leverage directives, dispatches them
//! to worker agents, and applies their structured reports. A norms engine
//! gates cycle start, broadcasts and agent outputs. The crate keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan tree, norms, context digest,
//!   autonomy score). No I/O, no clocks.
//! - **[`io`]**: Side effects (config and state files, prompt rendering,
//!   LLM subprocess calls).
//!
//! [`contract`] validates LLM text. [`cycle`], [`looping`] and [`validate`]
//! coordinate core logic with I/O to implement CLI commands.

pub mod contract;
pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
pub mod validate;
