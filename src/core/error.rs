// src/core/error.rs

use thiserror::Error;

/// Rejections raised before any pipeline is scheduled. No partial batch ever
/// starts when one of these is returned.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("max_workers must be between 1 and 32, got {0}")]
    InvalidWorkerCount(usize),
    #[error("no targets to scan")]
    EmptyTargetList,
}

/// Failure to expand a raw target specification.
#[derive(Debug, Error)]
pub enum TargetParseError {
    #[error("invalid target {spec:?}: {detail}")]
    InvalidTarget { spec: String, detail: String },
}

/// Persistence failures. These are fatal to the target whose pipeline raised
/// them and are caught at the pool task boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("unknown scan: {0}")]
    UnknownScan(String),
    #[error("unknown host: {0}")]
    UnknownHost(i64),
    #[error("tls_json already set for host {0}")]
    TlsAlreadySet(i64),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Conditions fatal to a single target's pipeline. Degraded stages never
/// produce one of these; only persistence failures and serialization of the
/// records we own do.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to serialize tool payload: {0}")]
    Serialize(#[from] serde_json::Error),
}
