//! SSH Fleet Orchestration Library
//!
//! Core functionality for managing a fleet of remote hosts over SSH:
//! shell account provisioning, host telemetry, maintenance tasks, and
//! periodic connection-limit enforcement.

pub mod audit;
pub mod command;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod maintenance;
pub mod provision;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod util;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
