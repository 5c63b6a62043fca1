//! Audit logger implementation

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use super::error::{AuditError, AuditResult};
use super::types::{AuditConfig, AuditEntry, AuditLevel};
use super::AuditSink;

/// Open log file and the number of bytes written to it
struct LogFile {
    file: File,
    size: usize,
}

/// Audit logger that writes JSON lines to file and/or console
pub struct AuditLogger {
    config: AuditConfig,
    current: Mutex<Option<LogFile>>,
}

impl AuditLogger {
    /// Create a new audit logger with the given configuration
    pub fn new(config: AuditConfig) -> AuditResult<Self> {
        let current = match config.log_file {
            Some(ref path) => {
                // Ensure log directory exists
                let path = PathBuf::from(path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| AuditError::Open(format!("create {:?}: {}", parent, e)))?;
                }
                let file = open_append(&path)
                    .map_err(|e| AuditError::Open(format!("open {:?}: {}", path, e)))?;
                let size = file
                    .metadata()
                    .map_err(|e| AuditError::Open(format!("stat {:?}: {}", path, e)))?;
                Some(LogFile {
                    file,
                    size: size.len() as usize,
                })
            }
            None => None,
        };

        Ok(Self {
            config,
            current: Mutex::new(current),
        })
    }

    /// Log an audit entry
    pub fn log(&self, entry: &AuditEntry) -> AuditResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let json = serde_json::to_string(entry)?;

        if self.config.log_to_console {
            match entry.level {
                AuditLevel::Info => info!("[AUDIT] {}", json),
                AuditLevel::Warning => warn!("[AUDIT] {}", json),
                AuditLevel::Error => error!("[AUDIT] {}", json),
            }
        }

        self.write_to_file(&json)
    }

    /// Write a line to the log file, rotating once it grows past the limit
    fn write_to_file(&self, line: &str) -> AuditResult<()> {
        let mut guard = self.current.lock().map_err(|_| AuditError::Poisoned)?;

        let Some(current) = guard.as_mut() else {
            return Ok(());
        };

        let line_with_newline = format!("{}\n", line);
        current.file.write_all(line_with_newline.as_bytes())?;
        current.size += line_with_newline.len();

        if current.size >= self.config.max_file_size {
            *guard = Some(self.rotate_log()?);
        }

        Ok(())
    }

    /// Shift `audit.log.N` files up by one and start a fresh log file
    fn rotate_log(&self) -> AuditResult<LogFile> {
        let path = self
            .config
            .log_file
            .as_ref()
            .ok_or_else(|| AuditError::Rotation("No log file configured".to_string()))?;
        let path = PathBuf::from(path);

        debug!("Rotating audit log: {:?}", path);

        // Remove oldest rotated file if it exists
        let oldest = rotated_path(&path, self.config.max_rotated_files);
        if oldest.exists() {
            fs::remove_file(&oldest)
                .map_err(|e| AuditError::Rotation(format!("Failed to remove old log: {}", e)))?;
        }

        for i in (1..self.config.max_rotated_files).rev() {
            let old_path = rotated_path(&path, i);
            if old_path.exists() {
                fs::rename(&old_path, rotated_path(&path, i + 1))
                    .map_err(|e| AuditError::Rotation(format!("Failed to rotate log: {}", e)))?;
            }
        }

        if path.exists() {
            if self.config.max_rotated_files > 0 {
                fs::rename(&path, rotated_path(&path, 1)).map_err(|e| {
                    AuditError::Rotation(format!("Failed to rename current log: {}", e))
                })?;
            } else {
                fs::remove_file(&path).map_err(|e| {
                    AuditError::Rotation(format!("Failed to truncate current log: {}", e))
                })?;
            }
        }

        let file = open_append(&path).map_err(|e| {
            AuditError::Rotation(format!("Failed to create new log file: {}", e))
        })?;

        info!("Audit log rotated successfully");
        Ok(LogFile { file, size: 0 })
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }
}

impl AuditSink for AuditLogger {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()> {
        self.log(entry)
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotated_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RequestState, Route};
    use tempfile::TempDir;

    fn sample_entry(query: &str) -> AuditEntry {
        let mut state = RequestState::new(query, &[], "user-1");
        state.set_route(Route::Direct).unwrap();
        state.final_response = "hello".to_string();
        AuditEntry::from_result(&state.into_result(), "user-1")
    }

    fn file_config(temp_dir: &TempDir, max_file_size: usize) -> AuditConfig {
        let log_path = temp_dir.path().join("audit.log");
        AuditConfig {
            log_file: Some(log_path.to_str().unwrap().to_string()),
            max_file_size,
            max_rotated_files: 2,
            log_to_console: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_log_entry_as_json_line() {
        let temp_dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(file_config(&temp_dir, 1024 * 1024)).unwrap();

        let entry = sample_entry("hi");
        logger.record(&entry).unwrap();

        let contents = fs::read_to_string(temp_dir.path().join("audit.log")).unwrap();
        let line = contents.lines().next().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["request_id"], entry.request_id.as_str());
        assert_eq!(parsed["route"], "direct");
        assert_eq!(parsed["status"], "success");
    }

    #[test]
    fn test_disabled_logger_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let config = AuditConfig {
            enabled: false,
            ..file_config(&temp_dir, 1024)
        };
        let logger = AuditLogger::new(config).unwrap();
        logger.record(&sample_entry("hi")).unwrap();

        let contents = fs::read_to_string(temp_dir.path().join("audit.log")).unwrap();
        assert!(contents.is_empty());
    }

    #[test]
    fn test_rotation_keeps_bounded_files() {
        let temp_dir = TempDir::new().unwrap();
        // every entry exceeds the limit, so each write rotates
        let logger = AuditLogger::new(file_config(&temp_dir, 16)).unwrap();
        for i in 0..4 {
            logger.record(&sample_entry(&format!("q{}", i))).unwrap();
        }

        let base = temp_dir.path().join("audit.log");
        assert!(base.exists());
        assert!(rotated_path(&base, 1).exists());
        assert!(rotated_path(&base, 2).exists());
        assert!(!rotated_path(&base, 3).exists());
    }
}
