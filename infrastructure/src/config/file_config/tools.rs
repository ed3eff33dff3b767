//! `[tools]` section and `[[tools.providers]]` entries

use std::collections::BTreeMap;
use std::time::Duration;

use pentree_domain::TransportDescriptor;
use serde::{Deserialize, Serialize};

use crate::tools::RegistrySettings;

/// Tool provider connection settings
///
/// ```toml
/// [tools]
/// connect_timeout_secs = 30
///
/// [[tools.providers]]
/// id = "kali"
/// command = "mcp-kali-server"
/// args = ["--stdio"]
///
/// [[tools.providers]]
/// id = "burp"
/// address = "127.0.0.1:9876"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileToolsConfig {
    pub connect_timeout_secs: u64,
    pub connect_attempts: usize,
    /// Keep-alive ping interval; 0 disables keep-alive
    pub keepalive_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub max_consecutive_timeouts: usize,
    pub providers: Vec<FileProviderConfig>,
}

impl Default for FileToolsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            connect_attempts: 2,
            keepalive_interval_secs: 30,
            ping_timeout_secs: 10,
            max_consecutive_timeouts: 3,
            providers: Vec::new(),
        }
    }
}

impl FileToolsConfig {
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            connect_attempts: self.connect_attempts.max(1),
            max_consecutive_timeouts: self.max_consecutive_timeouts.max(1),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
        }
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &FileProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }
}

/// One MCP tool provider: a local command (stdio) or a network address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProviderConfig {
    pub id: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// `host:port` of an already running provider
    pub address: Option<String>,
    pub enabled: bool,
}

impl Default for FileProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            address: None,
            enabled: true,
        }
    }
}

impl FileProviderConfig {
    /// `None` unless exactly one of `command` and `address` is set.
    pub fn transport(&self) -> Option<TransportDescriptor> {
        match (&self.command, &self.address) {
            (Some(command), None) => Some(TransportDescriptor::Stdio {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            (None, Some(address)) => Some(TransportDescriptor::tcp(address.clone())),
            _ => None,
        }
    }
}
