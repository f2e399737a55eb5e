//! Audit Store
//!
//! Durable record of webhook traffic. Two independent targets:
//! an append-only raw request log (JSON Lines) and a pair of overwritten
//! snapshots holding the last response and the last error.
//!
//! The store is single-writer. Instances sharing a data directory need
//! external mutual exclusion.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{DispatchFailure, DispatchReport};

/// Append-only log of raw inbound payloads
pub const REQUEST_LOG_FILE: &str = "webhook_requests.log";

/// Snapshot of the most recent successful response
pub const LAST_RESPONSE_FILE: &str = "webhook_last_response.json";

/// Snapshot of the most recent dispatch error
pub const LAST_ERROR_FILE: &str = "webhook_last_error.json";

#[derive(Error, Debug, Clone)]
pub enum AuditError {
    #[error("Failed to create data directory {path}: {message}")]
    DirectoryError { path: String, message: String },

    #[error("Failed to serialize audit record: {0}")]
    SerializationError(String),

    #[error("Failed to append to request log: {0}")]
    AppendError(String),

    #[error("Failed to write snapshot {path}: {message}")]
    SnapshotError { path: String, message: String },

    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },
}

/// One line of the raw request log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLogEntry {
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Outcome document to persist as a snapshot
#[derive(Debug, Clone, Copy)]
pub enum OutcomeSnapshot<'a> {
    Response(&'a DispatchReport),
    Error(&'a DispatchFailure),
}

/// File-backed audit trail rooted at a data directory
#[derive(Debug, Clone)]
pub struct AuditStore {
    data_dir: PathBuf,
}

impl AuditStore {
    /// Open the store, creating the data directory if needed
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let data_dir = data_dir.into();

        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).map_err(|e| AuditError::DirectoryError {
                path: data_dir.display().to_string(),
                message: e.to_string(),
            })?;
            tracing::info!("Created data directory: {}", data_dir.display());
        }

        // Workers are handed this path, so make it independent of their cwd
        let data_dir = fs::canonicalize(&data_dir).unwrap_or(data_dir);

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn request_log_path(&self) -> PathBuf {
        self.data_dir.join(REQUEST_LOG_FILE)
    }

    pub fn last_response_path(&self) -> PathBuf {
        self.data_dir.join(LAST_RESPONSE_FILE)
    }

    pub fn last_error_path(&self) -> PathBuf {
        self.data_dir.join(LAST_ERROR_FILE)
    }

    /// Append a timestamped copy of a raw payload to the request log
    pub fn append_raw(&self, payload: &Value) -> Result<(), AuditError> {
        let entry = RawLogEntry {
            timestamp: Utc::now(),
            payload: payload.clone(),
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| AuditError::SerializationError(e.to_string()))?;
        line.push('\n');

        let path = self.request_log_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuditError::AppendError(e.to_string()))?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| AuditError::AppendError(e.to_string()))?;

        tracing::debug!("Request logged to {}", path.display());
        Ok(())
    }

    /// Overwrite the snapshot matching the outcome. The other snapshot is
    /// left untouched.
    pub fn record_outcome(&self, outcome: OutcomeSnapshot<'_>) -> Result<(), AuditError> {
        match outcome {
            OutcomeSnapshot::Response(report) => {
                write_snapshot(&self.last_response_path(), report)
            }
            OutcomeSnapshot::Error(failure) => write_snapshot(&self.last_error_path(), failure),
        }
    }

    /// All entries in the raw request log, oldest first
    pub fn raw_entries(&self) -> Result<Vec<RawLogEntry>, AuditError> {
        let path = self.request_log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let read_error = |message: String| AuditError::ReadError {
            path: path.display().to_string(),
            message,
        };

        let content = fs::read_to_string(&path).map_err(|e| read_error(e.to_string()))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| read_error(e.to_string())))
            .collect()
    }

    pub fn last_response(&self) -> Result<Option<DispatchReport>, AuditError> {
        read_snapshot(&self.last_response_path())
    }

    pub fn last_error(&self) -> Result<Option<DispatchFailure>, AuditError> {
        read_snapshot(&self.last_error_path())
    }
}

/// Replace a snapshot file whole: write a sibling temp file, then rename
fn write_snapshot<T: Serialize>(path: &Path, document: &T) -> Result<(), AuditError> {
    let snapshot_error = |message: String| AuditError::SnapshotError {
        path: path.display().to_string(),
        message,
    };

    let content = serde_json::to_string_pretty(document)
        .map_err(|e| AuditError::SerializationError(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| snapshot_error(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| snapshot_error(e.to_string()))?;

    tracing::info!("Snapshot saved to {}", path.display());
    Ok(())
}

fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AuditError> {
    if !path.exists() {
        return Ok(None);
    }

    let read_error = |message: String| AuditError::ReadError {
        path: path.display().to_string(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| read_error(e.to_string()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| read_error(e.to_string()))
}
