//! Audit sink errors

use thiserror::Error;

/// Failure to persist an audit entry. Never reaches the routing result.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("audit entry encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit log rotation failed: {0}")]
    Rotation(String),

    #[error("audit log unavailable: {0}")]
    Open(String),

    #[error("audit sink lock poisoned")]
    Poisoned,
}

pub type AuditResult<T> = Result<T, AuditError>;
