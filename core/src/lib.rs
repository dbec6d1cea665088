//! Host convergence engine.
//!
//! A manifest of packages, services, remote files and iptables chains/rules
//! is turned into a dependency graph, ordered, checked for firewall policy
//! mistakes and then converged one resource at a time through providers.

pub mod cli;
pub mod command;
pub mod convergence;
pub mod engine;
pub mod error;
pub mod firewall;
pub mod graph;
pub mod help;
pub mod infrastructure;
pub mod manifest;
pub mod types;

pub use engine::Engine;
pub use error::{ConvergeError, Result};
