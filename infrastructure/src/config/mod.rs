//! Configuration file loading for pentree
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `PENTREE_*` environment variables
//! 2. `--config <path>` specified file
//! 3. Project root: `./pentree.toml` or `./.pentree.toml`
//! 4. Global: `$XDG_CONFIG_HOME/pentree/config.toml` (or `~/.config/pentree/config.toml`)
//! 5. Default values

mod file_config;
mod loader;
pub mod validation;

pub use file_config::{
    FileConfig, FileEngineConfig, FileExecutionConfig, FileLogConfig, FileOracleConfig,
    FileProviderConfig, FileToolsConfig,
};
pub use loader::{ConfigError, ConfigLoader};
pub use validation::{ConfigIssue, ConfigIssueCode, Severity};
