//! Tool providers and the registry that routes invocations to them.
//!
//! - [`McpToolProvider`]: MCP over stdio or TCP
//! - [`ProviderRegistry`]: lifecycle, health checks and the
//!   [`ToolGateway`](pentree_application::ToolGateway) implementation

pub mod connection;
pub mod mcp_provider;
pub mod protocol;
pub mod registry;

pub use connection::{JsonRpcConnection, RpcError};
pub use mcp_provider::McpToolProvider;
pub use registry::{ConnectReport, ProviderRegistry, RegistrySettings};
