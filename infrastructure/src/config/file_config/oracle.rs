//! `[oracle]` section

use serde::{Deserialize, Serialize};

/// Decision oracle endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOracleConfig {
    /// Base URL of an OpenAI-compatible API (`.../v1`)
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Never call the oracle; every decision is a fallback
    pub offline: bool,
}

impl Default for FileOracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: 0.2,
            max_tokens: None,
            offline: false,
        }
    }
}

impl FileOracleConfig {
    /// The API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}
