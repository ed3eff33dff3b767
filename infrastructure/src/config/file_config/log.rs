//! `[log]` section

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where diagnostics and the execution audit trail are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// Directory for the diagnostic log and the JSONL execution log
    pub dir: Option<PathBuf>,
    /// Write the JSONL execution log (requires `dir`)
    pub execution_log: bool,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            execution_log: true,
        }
    }
}
