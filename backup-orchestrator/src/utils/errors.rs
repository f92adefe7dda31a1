//! Error types for the backup orchestrator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Destination is not a directory: {0}")]
    NotADirectory(String),

    #[error("Destination already exists: {0}")]
    DestinationExists(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Backup already exists: {0}")]
    BackupExists(String),

    #[error(
        "Insufficient space at destination: {required} bytes required, {available} bytes available"
    )]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cluster membership error: {0}")]
    Membership(String),

    #[error("Invalid restore mapping: {0}")]
    InvalidMapping(String),

    #[error("Invalid object size: {0}")]
    InvalidSize(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
