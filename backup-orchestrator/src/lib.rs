//! Backup Orchestrator Library
//!
//! Backup and restore orchestration for the nodes of a partitioned database
//! cluster: schema cataloguing, table scoping, object transfer planning,
//! restore topology resolution and purge of decommissioned nodes.

pub mod config;
pub mod filter;
pub mod fs;
pub mod manifest;
pub mod monitoring;
pub mod purge;
pub mod restore;
pub mod schema;
pub mod storage;
pub mod transfer;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use crate::config::Config;
pub use utils::errors::{OrchestratorError, Result};
