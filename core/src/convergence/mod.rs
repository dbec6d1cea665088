//! Convergence: ordering and executing resources.
//!
//! `planner` turns a resource graph into a total order. `executor` walks that
//! order through the providers, with the bounded retry policy from `retry`.

pub mod executor;
pub mod planner;
pub mod retry;
