//! Plain data types shared across the engine.

pub mod config;
pub mod firewall;
pub mod report;
pub mod resource;
pub mod state;
