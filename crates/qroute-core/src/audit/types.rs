//! Audit log entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::state::{ExecutionLog, Route, RouteResult, RouteStatus, Workflow};

/// Audit event severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Request completed normally
    Info,
    /// A fallback path produced the response
    Warning,
    /// Request timed out or hit the catch-all
    Error,
}

impl From<RouteStatus> for AuditLevel {
    fn from(status: RouteStatus) -> Self {
        match status {
            RouteStatus::Success | RouteStatus::Partial => AuditLevel::Info,
            RouteStatus::Degraded => AuditLevel::Warning,
            RouteStatus::Timeout | RouteStatus::Error => AuditLevel::Error,
        }
    }
}

/// Audit record of one completed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: String,
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub request_id: String,
    pub user_id: String,
    pub route: Option<Route>,
    pub status: RouteStatus,
    pub workflow: Option<Workflow>,
    pub responders_used: Vec<String>,
    pub processing_time_ms: u64,
    pub error: Option<ErrorKind>,
    /// Full stage log of the request
    pub stages: ExecutionLog,
}

impl AuditEntry {
    /// Build the audit record for a finished request
    pub fn from_result(result: &RouteResult, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            level: AuditLevel::from(result.status),
            request_id: result.request_id.clone(),
            user_id: user_id.into(),
            route: result.route_taken,
            status: result.status,
            workflow: result.workflow,
            responders_used: result.responders_used.clone(),
            processing_time_ms: result.processing_time_ms,
            error: result.error,
            stages: result.execution_log.clone(),
        }
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging
    pub enabled: bool,
    /// Log file path (None = no file logging)
    pub log_file: Option<String>,
    /// Maximum log file size in bytes before rotation
    pub max_file_size: usize,
    /// Number of rotated log files to keep
    pub max_rotated_files: usize,
    /// Log to stdout/stderr
    pub log_to_console: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: Some("logs/audit.log".to_string()),
            max_file_size: 10 * 1024 * 1024, // 10 MB
            max_rotated_files: 5,
            log_to_console: false,
        }
    }
}
