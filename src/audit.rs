// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request audit log.
//!
//! Every accepted URL list is recorded before any download starts. The log is
//! append-only: one JSON line per URL with the time it was accepted.
//!
//! Log format:
//! `{"url":"https://drive.example.com/uc?id=...","timestamp":"2024-01-15T10:23:45Z"}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Failure to persist an audit record.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}

/// One audited link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only store of accepted URLs.
pub trait AuditStore: Send + Sync {
    /// Durably record every URL of one request. An error aborts the request.
    fn record(&self, urls: &[String]) -> Result<(), AuditError>;
}

/// Audit store that writes JSON lines to a file.
pub struct JsonlAuditStore {
    /// Path to the audit log file
    log_path: PathBuf,
    /// Whether logging is enabled
    enabled: bool,
    /// Serializes appends so lines from concurrent requests never interleave
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    /// Create the store, making sure the parent directory exists.
    pub fn new(log_path: impl Into<PathBuf>, enabled: bool) -> Result<Self, AuditError> {
        let log_path = log_path.into();
        if enabled {
            if let Some(parent) = log_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        Ok(Self {
            log_path,
            enabled,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the audit log file path
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Read every entry back from the log file.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AuditError::from))
            .collect()
    }
}

impl AuditStore for JsonlAuditStore {
    fn record(&self, urls: &[String]) -> Result<(), AuditError> {
        if !self.enabled {
            return Ok(());
        }

        let mut buf = Vec::new();
        for url in urls {
            serde_json::to_writer(&mut buf, &AuditEntry::new(url.clone()))?;
            buf.push(b'\n');
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AuditError::Unavailable("audit writer lock poisoned".into()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(&buf)?;
        file.sync_data()?;

        Ok(())
    }
}

/// In-memory audit store.
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn record(&self, urls: &[String]) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AuditError::Unavailable("audit store lock poisoned".into()))?;
        entries.extend(urls.iter().map(|url| AuditEntry::new(url.clone())));
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_jsonl_store_appends_in_order() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonlAuditStore::new(dir.path().join("logs/audit.jsonl"), true).unwrap();

        store.record(&urls(&["https://a/1", "https://a/2"])).unwrap();
        store.record(&urls(&["https://b/1"])).unwrap();

        let entries = store.read_all().unwrap();
        let recorded: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(recorded, vec!["https://a/1", "https://a/2", "https://b/1"]);
        assert!(entries[0].timestamp <= entries[2].timestamp);
    }

    #[test]
    fn test_disabled_store_writes_nothing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("audit.jsonl");
        let store = JsonlAuditStore::new(&path, false).unwrap();

        store.record(&urls(&["https://a/1"])).unwrap();
        assert!(!path.exists());
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_unwritable_log_fails() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        // A directory where the file should be makes every open fail.
        let path = dir.path().join("audit.jsonl");
        fs::create_dir_all(&path).unwrap();
        let store = JsonlAuditStore::new(&path, true).unwrap();

        let result = store.record(&urls(&["https://a/1"]));
        assert!(matches!(result, Err(AuditError::Io(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryAuditStore::new();
        store.record(&urls(&["https://a/1", "https://a/2"])).unwrap();
        let entries = store.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].url, "https://a/2");
    }

    #[test]
    fn test_entry_line_format() {
        let entry = AuditEntry::new("https://a/1");
        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.starts_with(r#"{"url":"https://a/1","timestamp":""#));
    }
}
