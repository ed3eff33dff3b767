//! Tool provider abstraction
//!
//! A tool provider is an external process or service exposing capabilities
//! (port scanners, brute-forcers, exploit frameworks) over a transport. The
//! core never looks inside a [`TransportDescriptor`]; only the
//! infrastructure adapters that implement [`ToolProvider`] do.
//!
//! # Provider lifecycle
//!
//! ```text
//!  Disconnected ──► Connecting ──► Ready ◄──► Degraded
//!                        │           │           │
//!                        └───────────┴───────────┴──► Dead
//! ```
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Ready` | capabilities discovered, invocations dispatched |
//! | `Degraded` | recent timeout or missed keep-alive; re-probed before use |
//! | `Dead` | exited, protocol violation or too many timeouts; never used again in this run |

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::entities::ToolCapability;

/// Identifier of a configured tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Dead,
}

impl ProviderState {
    /// Whether the provider may still serve invocations in this run.
    pub fn is_live(&self) -> bool {
        matches!(self, ProviderState::Ready | ProviderState::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderState::Disconnected => "disconnected",
            ProviderState::Connecting => "connecting",
            ProviderState::Ready => "ready",
            ProviderState::Degraded => "degraded",
            ProviderState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to reach a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportDescriptor {
    /// Spawn a local process and talk over its stdin/stdout
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Attach to an already running service
    Tcp { address: String },
}

impl TransportDescriptor {
    pub fn stdio(command: impl Into<String>) -> Self {
        TransportDescriptor::Stdio {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        TransportDescriptor::Tcp {
            address: address.into(),
        }
    }
}

impl std::fmt::Display for TransportDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportDescriptor::Stdio { command, args, .. } if args.is_empty() => {
                write!(f, "stdio:{}", command)
            }
            TransportDescriptor::Stdio { command, args, .. } => {
                write!(f, "stdio:{} {}", command, args.join(" "))
            }
            TransportDescriptor::Tcp { address } => write!(f, "tcp:{}", address),
        }
    }
}

/// Error type for tool provider operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Process could not be spawned or the address could not be reached
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Operation attempted before a successful connect
    #[error("Provider not connected")]
    NotConnected,

    /// The provider went away (process exited, socket closed)
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// The provider sent something that is not valid protocol traffic
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The provider answered with an error response
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The capability ran and reported failure
    #[error("Tool reported failure: {0}")]
    ToolFailed(String),
}

impl ProviderError {
    /// Errors after which the provider cannot be trusted for the rest of the run.
    pub fn is_fatal_for_provider(&self) -> bool {
        matches!(
            self,
            ProviderError::TransportClosed(_)
                | ProviderError::ProtocolViolation(_)
                | ProviderError::NotConnected
        )
    }
}

/// Tool provider abstraction - an external source of capabilities.
///
/// Implementations are driven by the provider registry, which owns the
/// lifecycle state and the capability cache; implementations only speak
/// their transport.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn transport(&self) -> &TransportDescriptor;

    /// Establish the session (spawn/attach plus any handshake).
    ///
    /// Calling it again replaces a previous session.
    async fn connect(&self) -> Result<(), ProviderError>;

    /// Discover the capabilities of the current session.
    async fn list_capabilities(&self) -> Result<Vec<ToolCapability>, ProviderError>;

    /// Invoke one capability and return its raw textual output.
    async fn invoke(
        &self,
        capability: &str,
        parameters: &Map<String, Value>,
    ) -> Result<String, ProviderError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), ProviderError>;

    /// Tell the provider to abandon in-flight invocations (after a timeout).
    async fn cancel_in_flight(&self) {}

    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A mock provider for testing
    struct MockProvider {
        id: ProviderId,
        transport: TransportDescriptor,
        connected: AtomicBool,
    }

    impl MockProvider {
        fn new(id: &str) -> Self {
            Self {
                id: ProviderId::new(id),
                transport: TransportDescriptor::stdio("mock-server"),
                connected: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ToolProvider for MockProvider {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        fn transport(&self) -> &TransportDescriptor {
            &self.transport
        }

        async fn connect(&self) -> Result<(), ProviderError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn list_capabilities(&self) -> Result<Vec<ToolCapability>, ProviderError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ProviderError::NotConnected);
            }
            Ok(vec![ToolCapability::new(self.id.clone(), "port_scan", "")])
        }

        async fn invoke(
            &self,
            capability: &str,
            _parameters: &Map<String, Value>,
        ) -> Result<String, ProviderError> {
            if capability == "port_scan" {
                Ok("22/tcp open ssh".to_string())
            } else {
                Err(ProviderError::Rpc {
                    code: -32602,
                    message: format!("unknown tool {}", capability),
                })
            }
        }

        async fn ping(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn shutdown(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_provider_requires_connect() {
        let provider = MockProvider::new("mock");
        assert_eq!(
            provider.list_capabilities().await.unwrap_err(),
            ProviderError::NotConnected
        );
        provider.connect().await.unwrap();
        let caps = provider.list_capabilities().await.unwrap();
        assert_eq!(caps[0].qualified_name(), "mock/port_scan");
    }

    #[tokio::test]
    async fn test_provider_invoke() {
        let provider = MockProvider::new("mock");
        provider.connect().await.unwrap();
        let output = provider.invoke("port_scan", &Map::new()).await.unwrap();
        assert!(output.contains("ssh"));
        assert!(provider.invoke("nope", &Map::new()).await.is_err());
        provider.cancel_in_flight().await;
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ProviderError::TransportClosed("eof".into()).is_fatal_for_provider());
        assert!(ProviderError::ProtocolViolation("junk".into()).is_fatal_for_provider());
        assert!(!ProviderError::ToolFailed("exit 1".into()).is_fatal_for_provider());
        assert!(
            !ProviderError::Rpc {
                code: -32000,
                message: "x".into()
            }
            .is_fatal_for_provider()
        );
    }

    #[test]
    fn test_state_liveness() {
        assert!(ProviderState::Ready.is_live());
        assert!(ProviderState::Degraded.is_live());
        assert!(!ProviderState::Dead.is_live());
        assert!(!ProviderState::Connecting.is_live());
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(TransportDescriptor::tcp("127.0.0.1:9000").to_string(), "tcp:127.0.0.1:9000");
        let stdio = TransportDescriptor::Stdio {
            command: "nmap-mcp".into(),
            args: vec!["--stdio".into()],
            env: BTreeMap::new(),
        };
        assert_eq!(stdio.to_string(), "stdio:nmap-mcp --stdio");
    }
}
