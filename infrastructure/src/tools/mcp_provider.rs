//! Tool provider speaking MCP (JSON-RPC 2.0) over a child process's
//! stdin/stdout or a TCP socket.
//!
//! Session lifecycle:
//!
//! 1. spawn the process (or connect the socket)
//! 2. `initialize` request, then `notifications/initialized`
//! 3. `tools/list` (paginated) for capability discovery
//! 4. `tools/call` per invocation, `ping` for liveness

use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use pentree_domain::{
    ParameterSchema, ProviderError, ProviderId, ToolCapability, ToolProvider, TransportDescriptor,
};
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connection::{JsonRpcConnection, RpcError};
use super::protocol::{CallToolResult, InitializeParams, ToolsListResult};

/// Upper bound on `tools/list` pages, against providers that loop their cursor.
const MAX_LIST_PAGES: usize = 64;

impl From<RpcError> for ProviderError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Closed(reason) | RpcError::Io(reason) => ProviderError::TransportClosed(reason),
            RpcError::Protocol(detail) => ProviderError::ProtocolViolation(detail),
            RpcError::Remote { code, message } => ProviderError::Rpc { code, message },
            RpcError::Cancelled(id) => ProviderError::ToolFailed(format!("request {id} cancelled")),
        }
    }
}

/// One established session.
struct McpSession {
    connection: JsonRpcConnection,
    /// Spawned process for stdio transports; killed on drop
    child: Option<Child>,
    /// Unanswered `tools/call` ids. An abandoned call stays here until
    /// `cancel_in_flight` tells the provider about it.
    calls: StdMutex<BTreeSet<u64>>,
}

impl McpSession {
    fn new(connection: JsonRpcConnection, child: Option<Child>) -> Self {
        Self {
            connection,
            child,
            calls: StdMutex::new(BTreeSet::new()),
        }
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, BTreeSet<u64>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// MCP client for one configured provider.
pub struct McpToolProvider {
    id: ProviderId,
    transport: TransportDescriptor,
    session: RwLock<Option<Arc<McpSession>>>,
}

impl McpToolProvider {
    pub fn new(id: impl Into<ProviderId>, transport: TransportDescriptor) -> Self {
        Self {
            id: id.into(),
            transport,
            session: RwLock::new(None),
        }
    }

    async fn session(&self) -> Result<Arc<McpSession>, ProviderError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(ProviderError::NotConnected)
    }

    async fn open(&self) -> Result<McpSession, ProviderError> {
        match &self.transport {
            TransportDescriptor::Stdio { command, args, env } => {
                let program = which::which(command).map_err(|e| {
                    ProviderError::ConnectFailed(format!("{command}: {e}"))
                })?;
                debug!(provider = %self.id, program = %program.display(), "Spawning tool provider");

                let mut cmd = Command::new(&program);
                cmd.args(args)
                    .envs(env)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true);

                // Linux: have the kernel terminate the provider if we die without
                // running Drop (SIGKILL, OOM kill).
                #[cfg(target_os = "linux")]
                unsafe {
                    cmd.pre_exec(|| {
                        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                        Ok(())
                    });
                }

                let mut child = cmd
                    .spawn()
                    .map_err(|e| ProviderError::ConnectFailed(format!("{command}: {e}")))?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| ProviderError::ConnectFailed("stdin not captured".into()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| ProviderError::ConnectFailed("stdout not captured".into()))?;

                Ok(McpSession::new(
                    JsonRpcConnection::new(stdout, stdin),
                    Some(child),
                ))
            }
            TransportDescriptor::Tcp { address } => {
                debug!(provider = %self.id, address, "Connecting to tool provider");
                let stream = TcpStream::connect(address)
                    .await
                    .map_err(|e| ProviderError::ConnectFailed(format!("{address}: {e}")))?;
                let (read_half, write_half) = stream.into_split();
                Ok(McpSession::new(
                    JsonRpcConnection::new(read_half, write_half),
                    None,
                ))
            }
        }
    }
}

#[async_trait]
impl ToolProvider for McpToolProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn transport(&self) -> &TransportDescriptor {
        &self.transport
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        self.shutdown().await;

        let session = self.open().await?;
        let params = serde_json::to_value(InitializeParams::default())
            .map_err(|e| ProviderError::ProtocolViolation(e.to_string()))?;
        let result = session.connection.request("initialize", Some(params)).await?;
        session
            .connection
            .notify("notifications/initialized", None)
            .await?;

        let server = result
            .pointer("/serverInfo/name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let protocol = result
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(provider = %self.id, server, protocol, "Tool provider connected");
        *self.session.write().await = Some(Arc::new(session));
        Ok(())
    }

    async fn list_capabilities(&self) -> Result<Vec<ToolCapability>, ProviderError> {
        let session = self.session().await?;
        let mut capabilities = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = session.connection.request("tools/list", params).await?;
            let page: ToolsListResult = serde_json::from_value(result)
                .map_err(|e| ProviderError::ProtocolViolation(format!("tools/list: {e}")))?;

            capabilities.extend(page.tools.into_iter().map(|tool| {
                ToolCapability::new(
                    self.id.clone(),
                    tool.name,
                    tool.description.unwrap_or_default(),
                )
                .with_schema(ParameterSchema::from_json_schema(&tool.input_schema))
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    debug!(provider = %self.id, count = capabilities.len(), "Capabilities listed");
                    return Ok(capabilities);
                }
            }
        }

        warn!(provider = %self.id, pages = MAX_LIST_PAGES, "tools/list pagination did not end");
        Ok(capabilities)
    }

    async fn invoke(
        &self,
        capability: &str,
        parameters: &Map<String, Value>,
    ) -> Result<String, ProviderError> {
        let session = self.session().await?;
        let pending = session
            .connection
            .start_request(
                "tools/call",
                Some(json!({ "name": capability, "arguments": parameters })),
            )
            .await?;
        let id = pending.id();
        session.calls().insert(id);
        // Not reached when the caller drops us mid-call; the id stays tracked
        let response = pending.response().await;
        session.calls().remove(&id);

        let result: CallToolResult = serde_json::from_value(response?)
            .map_err(|e| ProviderError::ProtocolViolation(format!("tools/call: {e}")))?;

        let text = result.text();
        if result.is_error {
            return Err(ProviderError::ToolFailed(text));
        }
        Ok(text)
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        let session = self.session().await?;
        session.connection.request("ping", None).await?;
        Ok(())
    }

    async fn cancel_in_flight(&self) {
        let Ok(session) = self.session().await else {
            return;
        };
        let abandoned = std::mem::take(&mut *session.calls());
        for id in abandoned {
            session.connection.forget(id);
            let params = json!({ "requestId": id, "reason": "timeout" });
            if let Err(e) = session
                .connection
                .notify("notifications/cancelled", Some(params))
                .await
            {
                debug!(provider = %self.id, error = %e, "Cancel notification not delivered");
                return;
            }
        }
    }

    async fn shutdown(&self) {
        let Some(session) = self.session.write().await.take() else {
            return;
        };
        debug!(provider = %self.id, "Shutting down tool provider session");
        session.connection.close().await;
        // The child is killed by kill_on_drop once the last session handle goes.
        if let Ok(mut session) = Arc::try_unwrap(session)
            && let Some(child) = session.child.as_mut()
        {
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Minimal MCP server: two pages of tools, a scanner and a failing tool.
    async fn fake_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };
                let result = match msg["method"].as_str().unwrap() {
                    "initialize" => json!({
                        "protocolVersion": "2024-11-05",
                        "serverInfo": {"name": "fake-kali"},
                        "capabilities": {"tools": {}}
                    }),
                    "tools/list" if msg["params"]["cursor"] == "p2" => json!({
                        "tools": [{"name": "gobuster_dir", "description": "Brute-force web content"}]
                    }),
                    "tools/list" => json!({
                        "tools": [{
                            "name": "nmap_scan",
                            "description": "Port scan a host",
                            "inputSchema": {
                                "type": "object",
                                "properties": {"target": {"type": "string"}},
                                "required": ["target"]
                            }
                        }],
                        "nextCursor": "p2"
                    }),
                    "tools/call" if msg["params"]["name"] == "nmap_scan" => json!({
                        "content": [{"type": "text", "text": format!(
                            "Nmap scan report for {}\n22/tcp open ssh",
                            msg["params"]["arguments"]["target"].as_str().unwrap()
                        )}]
                    }),
                    "tools/call" => json!({
                        "content": [{"type": "text", "text": "wordlist missing"}],
                        "isError": true
                    }),
                    _ => json!({}),
                };
                let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
                let mut bytes = serde_json::to_vec(&reply).unwrap();
                bytes.push(b'\n');
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        address
    }

    #[tokio::test]
    async fn tcp_session_discovers_and_invokes() {
        let address = fake_server().await;
        let provider = McpToolProvider::new(ProviderId::new("kali"), TransportDescriptor::tcp(address));

        provider.connect().await.unwrap();
        provider.ping().await.unwrap();

        let caps = provider.list_capabilities().await.unwrap();
        let names: Vec<&str> = caps.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["nmap_scan", "gobuster_dir"]);
        assert_eq!(caps[0].provider.as_str(), "kali");
        assert_eq!(caps[0].schema.required_count(), 1);

        let mut params = Map::new();
        params.insert("target".into(), json!("10.0.0.5"));
        let output = provider.invoke("nmap_scan", &params).await.unwrap();
        assert!(output.contains("Nmap scan report for 10.0.0.5"));

        let err = provider.invoke("gobuster_dir", &Map::new()).await.unwrap_err();
        assert_eq!(err, ProviderError::ToolFailed("wordlist missing".into()));

        provider.shutdown().await;
        assert_eq!(provider.ping().await, Err(ProviderError::NotConnected));
    }

    /// Server that never answers `slow_scan`, holds pings until a cancel
    /// arrives, and reports every cancelled request id.
    async fn stalling_server() -> (String, tokio::sync::mpsc::UnboundedReceiver<(Value, Value)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (seen_tx, seen_rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut held_pings = Vec::new();

            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                let method = msg["method"].as_str().unwrap_or("").to_string();
                let mut replies = Vec::new();
                match method.as_str() {
                    "initialize" => replies.push((msg["id"].clone(), json!({"protocolVersion": "2024-11-05"}))),
                    "ping" => held_pings.push(msg["id"].clone()),
                    "tools/call" => {
                        let _ = seen_tx.send((json!("call"), msg["id"].clone()));
                    }
                    "notifications/cancelled" => {
                        let _ = seen_tx.send((json!("cancelled"), msg["params"]["requestId"].clone()));
                        replies.extend(held_pings.drain(..).map(|id| (id, json!({}))));
                    }
                    _ => {}
                }
                for (id, result) in replies {
                    let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
                    let mut bytes = serde_json::to_vec(&reply).unwrap();
                    bytes.push(b'\n');
                    if write_half.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
            }
        });

        (address, seen_rx)
    }

    #[tokio::test]
    async fn cancel_targets_only_abandoned_tool_calls() {
        let (address, mut seen) = stalling_server().await;
        let provider = Arc::new(McpToolProvider::new(
            ProviderId::new("kali"),
            TransportDescriptor::tcp(address),
        ));
        provider.connect().await.unwrap();

        let ping = tokio::spawn({
            let provider = Arc::clone(&provider);
            async move { provider.ping().await }
        });

        let call = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            provider.invoke("slow_scan", &Map::new()),
        )
        .await;
        assert!(call.is_err());
        let (kind, call_id) = seen.recv().await.unwrap();
        assert_eq!(kind, "call");

        provider.cancel_in_flight().await;

        let (kind, cancelled_id) = seen.recv().await.unwrap();
        assert_eq!(kind, "cancelled");
        assert_eq!(cancelled_id, call_id);
        // The ping was in flight during the cancel and still completes
        assert_eq!(ping.await.unwrap(), Ok(()));

        // Nothing left to cancel a second time
        provider.cancel_in_flight().await;
        provider.shutdown().await;
        assert!(seen.recv().await.is_none());
    }

    #[tokio::test]
    async fn calls_before_connect_are_rejected() {
        let provider = McpToolProvider::new(
            ProviderId::new("kali"),
            TransportDescriptor::tcp("127.0.0.1:1"),
        );
        assert_eq!(
            provider.invoke("nmap_scan", &Map::new()).await,
            Err(ProviderError::NotConnected)
        );
        assert_eq!(provider.list_capabilities().await, Err(ProviderError::NotConnected));
    }

    #[tokio::test]
    async fn missing_command_fails_to_connect() {
        let provider = McpToolProvider::new(
            ProviderId::new("ghost"),
            TransportDescriptor::stdio("pentree-test-no-such-binary"),
        );
        assert!(matches!(
            provider.connect().await,
            Err(ProviderError::ConnectFailed(_))
        ));
    }

    #[tokio::test]
    async fn closed_socket_is_reported_as_transport_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept and hang up immediately
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let provider = McpToolProvider::new(ProviderId::new("flaky"), TransportDescriptor::tcp(address));
        let err = provider.connect().await.unwrap_err();
        assert!(err.is_fatal_for_provider(), "unexpected error: {err:?}");
    }
}
