//! Audit sink for completed requests
//!
//! The router hands every finished request's execution log to an
//! [`AuditSink`]. [`AuditLogger`] is the file-backed implementation.

pub mod error;
pub mod logger;
pub mod types;

use std::sync::Mutex;

pub use error::{AuditError, AuditResult};
pub use logger::AuditLogger;
pub use types::{AuditConfig, AuditEntry, AuditLevel};

/// Receiver of completed request records
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()>;
}

/// Sink that keeps entries in memory
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded entries
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RequestState, RouteStatus};

    #[test]
    fn test_memory_sink_records_entries() {
        let sink = MemoryAuditSink::new();
        let result = RequestState::new("q", &[], "u").into_result();
        sink.record(&AuditEntry::from_result(&result, "u")).unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, "u");
        assert_eq!(entries[0].level, AuditLevel::Info);
    }

    #[test]
    fn test_level_follows_status() {
        assert_eq!(AuditLevel::from(RouteStatus::Degraded), AuditLevel::Warning);
        assert_eq!(AuditLevel::from(RouteStatus::Timeout), AuditLevel::Error);
    }
}
