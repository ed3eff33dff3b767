//! Oracle backed by any OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use pentree_application::ports::decision_oracle::{DecisionOracle, OracleError};
use pentree_domain::{OraclePromptTemplate, OracleRequest};
use serde_json::{Value, json};
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Longest slice of an error body kept in an error message.
const MAX_ERROR_BODY: usize = 300;

/// HTTP client for `POST {endpoint}/chat/completions`.
///
/// The call is not bounded here; the engine wraps every decision in its
/// oracle timeout.
pub struct OpenAiCompatibleOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleOracle {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            temperature: 0.2,
            max_tokens: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    fn request_body(&self, request: &OracleRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": OraclePromptTemplate::system()},
                {"role": "user", "content": OraclePromptTemplate::decision(request)},
            ],
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

/// First choice's message content.
fn extract_content(body: &Value) -> Result<String, OracleError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| OracleError::InvalidResponse("no choices[0].message.content".into()))?;
    if content.trim().is_empty() {
        return Err(OracleError::InvalidResponse("empty content".into()));
    }
    Ok(content.to_string())
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl DecisionOracle for OpenAiCompatibleOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn decide(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let mut http = self
            .client
            .post(self.completions_url())
            .json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        debug!(model = %self.model, task = %request.task.id, "Requesting oracle decision");
        let response = http
            .send()
            .await
            .map_err(|e| OracleError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OracleError::RequestFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(OracleError::RequestFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&text)
            )));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| OracleError::InvalidResponse(format!("not JSON: {e}")))?;
        extract_content(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pentree_domain::{Planner, PlanningLimits, PriorityStrategyKind, ViewFilter, WorldState};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn request() -> OracleRequest {
        let mut planner = Planner::new(
            PlanningLimits::default(),
            PriorityStrategyKind::SeverityFirst.build(),
        );
        let root = planner.create_root_task("enumerate services").unwrap();
        planner
            .oracle_request(
                &root,
                Some("10.0.0.5".into()),
                WorldState::new().view(&ViewFilter::default()),
                Vec::new(),
                Vec::new(),
            )
            .unwrap()
    }

    /// Serves one HTTP response and hands back the raw request it received.
    async fn serve_once(status: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/v1", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + length || n == 0 {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
        });

        (endpoint, rx)
    }

    #[test]
    fn body_carries_system_and_task_prompt() {
        let oracle = OpenAiCompatibleOracle::new("http://localhost:8080/v1/", "gpt-4o-mini")
            .with_max_tokens(Some(512));
        let body = oracle.request_body(&request());

        assert_eq!(oracle.completions_url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("enumerate services"));
        assert!(user.contains("Target: 10.0.0.5"));
    }

    #[test]
    fn extract_content_requires_text() {
        let ok = json!({"choices": [{"message": {"role": "assistant", "content": "{\"action\": \"verdict\"}"}}]});
        assert_eq!(extract_content(&ok).unwrap(), "{\"action\": \"verdict\"}");

        let empty = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(matches!(extract_content(&empty), Err(OracleError::InvalidResponse(_))));

        let missing = json!({"choices": []});
        assert!(matches!(extract_content(&missing), Err(OracleError::InvalidResponse(_))));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_BODY + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_ERROR_BODY);
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn decide_returns_first_choice() {
        let reply = json!({"choices": [{"message": {"content": "{\"action\": \"verdict\", \"status\": \"failed\"}"}}]});
        let (endpoint, received) = serve_once("200 OK", reply.to_string()).await;
        let oracle = OpenAiCompatibleOracle::new(endpoint, "local-model")
            .with_api_key(Some("sk-test".into()));

        let text = oracle.decide(&request()).await.unwrap();

        assert!(text.contains("\"verdict\""));
        let raw = received.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    }

    #[tokio::test]
    async fn http_error_is_request_failure() {
        let (endpoint, _received) =
            serve_once("503 Service Unavailable", r#"{"error": "overloaded"}"#.to_string()).await;
        let oracle = OpenAiCompatibleOracle::new(endpoint, "local-model");

        let err = oracle.decide(&request()).await.unwrap_err();

        assert_eq!(
            err,
            OracleError::RequestFailed(r#"HTTP 503: {"error": "overloaded"}"#.into())
        );
    }
}
