//! Application-level configuration.
//!
//! - [`EngineConfig`] — budgets, timeouts and priority strategy of one engagement
//! - [`RetryPolicy`] — per capability class retry budgets

pub mod engine_config;

pub use engine_config::{EngineConfig, RetryPolicy};
