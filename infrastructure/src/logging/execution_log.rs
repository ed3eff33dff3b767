//! JSONL file writer for execution records.
//!
//! Each [`ExecutionRecord`] is serialized as a single camelCase JSON line
//! and flushed immediately, so the audit trail survives a crash mid-run.

use chrono::{DateTime, Utc};
use pentree_application::ports::execution_log::ExecutionLogSink;
use pentree_domain::ExecutionRecord;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum LogReadError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}:{line}: {detail}")]
    Malformed {
        path: PathBuf,
        line: usize,
        detail: String,
    },
}

/// Execution log writing one JSON object per line.
///
/// Thread-safe via `Mutex<BufWriter<File>>`. Flushes on `Drop`.
pub struct JsonlExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlExecutionLog {
    /// Create a new log at the given path, truncating an existing file.
    ///
    /// Creates parent directories if they don't exist.
    /// Returns `None` if the file cannot be created.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(
                "Could not create execution log directory {}: {}",
                parent.display(),
                e
            );
            return None;
        }

        let file = match File::create(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not create execution log file {}: {}", path.display(), e);
                return None;
            }
        };

        Some(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// `<dir>/engagement-<UTC timestamp>.executions.jsonl`
    pub fn in_dir(dir: impl AsRef<Path>, started_at: DateTime<Utc>) -> Option<Self> {
        let name = format!(
            "engagement-{}.executions.jsonl",
            started_at.format("%Y%m%dT%H%M%SZ")
        );
        Self::new(dir.as_ref().join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a log back, in file order. Blank lines are skipped.
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<ExecutionRecord>, LogReadError> {
        let path = path.as_ref();
        let io_error = |source| LogReadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_error)?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| LogReadError::Malformed {
                path: path.to_path_buf(),
                line: index + 1,
                detail: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl ExecutionLogSink for JsonlExecutionLog {
    fn record(&self, record: &ExecutionRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(seq = record.seq, "Could not serialize execution record: {}", e);
                return;
            }
        };

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!(
                seq = record.seq,
                "Could not write execution log {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

impl Drop for JsonlExecutionLog {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
