//! Infrastructure layer for pentree
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer:
//!
//! - [`tools`]: MCP tool providers and the [`ProviderRegistry`] (`ToolGateway`)
//! - [`oracle`]: decision oracles (`DecisionOracle`)
//! - [`logging`]: the JSONL execution log (`ExecutionLogSink`)
//! - [`config`]: configuration file loading

pub mod config;
pub mod logging;
pub mod oracle;
pub mod tools;

// Re-export commonly used types
pub use config::{ConfigError, ConfigIssue, ConfigLoader, FileConfig, Severity};
pub use logging::{JsonlExecutionLog, LogReadError};
pub use oracle::{OfflineOracle, OpenAiCompatibleOracle};
pub use tools::{
    ConnectReport, JsonRpcConnection, McpToolProvider, ProviderRegistry, RegistrySettings,
    RpcError,
};
