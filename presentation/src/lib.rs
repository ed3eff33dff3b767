//! Presentation layer for pentree
//!
//! This crate contains CLI definitions, progress reporters and
//! engagement report formatters.

pub mod cli;
pub mod output;
pub mod progress;

// Re-export commonly used types
pub use cli::commands::{Cli, OutputFormat};
pub use output::console::ConsoleFormatter;
pub use progress::reporter::{ProgressReporter, SimpleProgress};
