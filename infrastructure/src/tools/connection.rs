//! Request/response correlation over one newline-delimited JSON-RPC stream.
//!
//! A background reader task owns the read half exclusively and resolves
//! pending requests through `oneshot` channels. Writes go through a shared
//! buffered writer. When the stream ends or carries something that is not
//! JSON-RPC, the connection is closed and every pending request fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseOut, METHOD_NOT_FOUND,
    MessageKind, classify_message,
};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    /// The stream ended (or was closed after a protocol violation)
    #[error("Connection closed: {0}")]
    Closed(String),

    /// The peer sent a frame that is not JSON-RPC
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The peer answered with an error object
    #[error("RPC error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    /// The request was forgotten before its response arrived
    #[error("Request {0} cancelled")]
    Cancelled(u64),
}

/// State shared between the connection handle and its reader task.
struct Shared {
    pending: StdMutex<PendingMap>,
    /// Why the connection closed, once it has
    closed: StdMutex<Option<RpcError>>,
    writer: Mutex<BufWriter<BoxedWriter>>,
}

impl Shared {
    fn close(&self, reason: RpcError) {
        {
            let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
            if closed.is_none() {
                *closed = Some(reason.clone());
            }
        }
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        for (id, tx) in drained {
            trace!(id, "Failing pending request");
            let _ = tx.send(Err(reason.clone()));
        }
    }

    fn forget(&self, id: u64) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    fn closed_reason(&self) -> Option<RpcError> {
        self.closed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn write_frame<T: Serialize>(&self, frame: &T) -> Result<(), RpcError> {
        let mut bytes = serde_json::to_vec(frame).map_err(|e| RpcError::Io(e.to_string()))?;
        bytes.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| RpcError::Io(e.to_string()))?;
        writer.flush().await.map_err(|e| RpcError::Io(e.to_string()))
    }
}

/// A request that has been written and awaits its response.
///
/// Dropping it before the response arrives removes its pending entry, so a
/// caller that gives up (timeout, cancelled task) leaves nothing behind.
pub struct PendingRequest {
    id: u64,
    rx: oneshot::Receiver<Result<Value, RpcError>>,
    shared: Arc<Shared>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn response(mut self) -> Result<Value, RpcError> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(self
                .shared
                .closed_reason()
                .unwrap_or(RpcError::Cancelled(self.id))),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.shared.forget(self.id) {
            trace!(id = self.id, "Abandoned request removed");
        }
    }
}

/// One JSON-RPC session over an arbitrary byte stream.
pub struct JsonRpcConnection {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl JsonRpcConnection {
    /// Start the reader task. Must be called within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            pending: StdMutex::new(HashMap::new()),
            closed: StdMutex::new(None),
            writer: Mutex::new(BufWriter::new(Box::new(writer) as BoxedWriter)),
        });
        let reader = tokio::spawn(reader_loop(BufReader::new(reader), Arc::clone(&shared)));
        Self {
            shared,
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    /// Send a request and wait for its response.
    ///
    /// Callers bound the wait with `tokio::time::timeout`; dropping the
    /// future removes the pending entry immediately.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.start_request(method, params).await?.response().await
    }

    /// Write a request and return a handle carrying its id.
    pub async fn start_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingRequest, RpcError> {
        if let Some(reason) = self.shared.closed_reason() {
            return Err(reason);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        let pending = PendingRequest {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        };

        debug!(id, method, "Sending request");
        self.shared
            .write_frame(&JsonRpcRequest::new(id, method, params))
            .await?;
        Ok(pending)
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        if let Some(reason) = self.shared.closed_reason() {
            return Err(reason);
        }
        self.shared
            .write_frame(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Ids of requests still waiting for a response.
    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drop a pending entry without waiting for its response.
    pub fn forget(&self, id: u64) {
        self.shared.forget(id);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed_reason().is_some()
    }

    /// Close the writer and fail every pending request.
    pub async fn close(&self) {
        self.shared.close(RpcError::Closed("closed by client".into()));
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for JsonRpcConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn reader_loop<R: AsyncRead + Unpin>(mut reader: BufReader<R>, shared: Arc<Shared>) {
    let mut line = String::new();

    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break RpcError::Closed("end of stream".into()),
            Ok(_) => {}
            Err(e) => break RpcError::Closed(e.to_string()),
        }

        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }
        trace!(frame, "Received frame");

        let json: Value = match serde_json::from_str(frame) {
            Ok(v) => v,
            Err(e) => break RpcError::Protocol(format!("unparseable frame: {e}")),
        };

        match classify_message(&json) {
            MessageKind::Response => {
                let Some(id) = json.get("id").and_then(Value::as_u64) else {
                    break RpcError::Protocol(format!("response with non-numeric id: {json}"));
                };
                let response: JsonRpcResponse = match serde_json::from_value(json) {
                    Ok(r) => r,
                    Err(e) => break RpcError::Protocol(format!("malformed response: {e}")),
                };
                let sender = shared
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                let Some(tx) = sender else {
                    debug!(id, "No pending receiver for response");
                    continue;
                };
                let result = match response.error {
                    Some(error) => Err(RpcError::Remote {
                        code: error.code,
                        message: error.message,
                    }),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(result);
            }
            MessageKind::IncomingRequest => {
                let id = json.get("id").cloned().unwrap_or(Value::Null);
                let method = json.get("method").and_then(Value::as_str).unwrap_or("");
                let reply = if method == "ping" {
                    JsonRpcResponseOut::result(id, json!({}))
                } else {
                    debug!(method, "Rejecting provider-initiated request");
                    JsonRpcResponseOut::error(id, METHOD_NOT_FOUND, format!("unsupported: {method}"))
                };
                if let Err(e) = shared.write_frame(&reply).await {
                    warn!(error = %e, "Failed to answer provider request");
                }
            }
            MessageKind::Notification => {
                let method = json.get("method").and_then(|m| m.as_str()).unwrap_or("");
                trace!(method, "Ignoring notification");
            }
            MessageKind::Invalid => {
                break RpcError::Protocol(format!("frame is neither request nor response: {json}"));
            }
        }
    };

    debug!(reason = %reason, "Reader loop finished");
    shared.close(reason);
}
