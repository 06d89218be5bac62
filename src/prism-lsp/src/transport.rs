//! Framed JSON-RPC transport over a language server's stdio.
//!
//! Every message is a UTF-8 JSON object preceded by a
//! `Content-Length: <n>\r\n\r\n` header. The transport owns the writer
//! half and a reader task that demultiplexes replies to their callers by
//! request id and dispatches notifications to registered handlers. When
//! the stream ends or a frame fails to decode, the reader exits, every
//! pending request is failed, and close observers fire so the owning
//! client can transition to crashed.

use crate::{LspError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

/// Largest inbound frame accepted before the connection is declared broken.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Handler invoked with (method, params) for an incoming notification.
pub type NotificationHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Observer invoked once when the reader exits.
pub type CloseObserver = Box<dyn Fn() + Send + Sync>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write one framed message.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> std::io::Result<()> {
    let content = serde_json::to_string(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let header = format!("Content-Length: {}\r\n\r\n", content.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(content.as_bytes()).await?;
    writer.flush().await
}

/// Read one framed message. `Ok(None)` is a clean EOF; `Err` is a framing
/// or decode failure after which the stream is unusable.
pub async fn read_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> std::result::Result<Option<Value>, String> {
    let mut content_length: usize = 0;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => return Ok(None),
            Ok(_) => {
                if line == "\r\n" || line == "\n" {
                    break;
                }
                if let Some(len_str) = line.strip_prefix("Content-Length:") {
                    content_length = len_str
                        .trim()
                        .parse()
                        .map_err(|e| format!("invalid Content-Length: {e}"))?;
                    if content_length > max_len {
                        return Err(format!(
                            "Content-Length {content_length} exceeds maximum {max_len}"
                        ));
                    }
                }
            }
            Err(e) => return Err(format!("IO error reading headers: {e}")),
        }
    }

    if content_length == 0 {
        return Err("message without Content-Length header".to_string());
    }

    let mut content = vec![0u8; content_length];
    reader
        .read_exact(&mut content)
        .await
        .map_err(|e| format!("IO error reading content: {e}"))?;
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| format!("JSON parse error: {e}"))
}

/// Bidirectional framed channel to one server process.
pub struct Transport {
    writer: Mutex<Option<BoxedWriter>>,
    pending: StdMutex<HashMap<i64, oneshot::Sender<Value>>>,
    handlers: StdMutex<HashMap<String, NotificationHandler>>,
    catch_all: StdMutex<Option<NotificationHandler>>,
    close_observers: StdMutex<Vec<CloseObserver>>,
    shutdown_tx: StdMutex<Option<mpsc::Sender<()>>>,
    alive: AtomicBool,
}

impl Transport {
    /// Start a transport over the given stream halves and spawn its reader.
    pub fn spawn<W, R>(writer: W, reader: R) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let transport = Arc::new(Self {
            writer: Mutex::new(Some(Box::new(writer))),
            pending: StdMutex::new(HashMap::new()),
            handlers: StdMutex::new(HashMap::new()),
            catch_all: StdMutex::new(None),
            close_observers: StdMutex::new(Vec::new()),
            shutdown_tx: StdMutex::new(Some(shutdown_tx)),
            alive: AtomicBool::new(true),
        });

        let for_reader = transport.clone();
        tokio::spawn(async move {
            for_reader.read_loop(reader, shutdown_rx).await;
            for_reader.mark_closed();
        });

        transport
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send a request and return the channel its reply will arrive on.
    /// The caller owns the id and the timeout; see [`Transport::discard`].
    pub async fn send_request(&self, id: i64, method: &str, params: Value) -> Result<oneshot::Receiver<Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(e) = self.write(&message).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Send a fire-and-forget notification.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write(&message).await
    }

    /// Drop the pending entry for a request that timed out or was
    /// cancelled, so a late reply is discarded instead of delivered.
    pub fn discard(&self, id: i64) {
        self.pending.lock().unwrap().remove(&id);
    }

    /// Register a handler for a notification method.
    pub fn register_notification_handler(&self, method: impl Into<String>, handler: NotificationHandler) {
        self.handlers.lock().unwrap().insert(method.into(), handler);
    }

    /// Register the fallback handler for unrouted notifications.
    pub fn register_catch_all(&self, handler: NotificationHandler) {
        *self.catch_all.lock().unwrap() = Some(handler);
    }

    /// Register an observer run once when the reader exits.
    pub fn on_close(&self, observer: CloseObserver) {
        if self.alive.load(Ordering::SeqCst) {
            self.close_observers.lock().unwrap().push(observer);
        } else {
            observer();
        }
    }

    /// Stop the reader and close the write half, signalling EOF.
    pub async fn close(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.try_send(());
        }
        let mut writer = self.writer.lock().await;
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }
        self.mark_closed();
    }

    async fn write(&self, message: &Value) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => {
                write_message(w, message).await?;
                debug!(method = ?message.get("method"), "sent message");
                Ok(())
            }
            None => Err(LspError::ServerCrashed("server stdin is closed".into())),
        }
    }

    async fn read_loop<R: AsyncRead + Send + Unpin>(
        self: &Arc<Self>,
        reader: R,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut reader = BufReader::new(reader);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("transport reader received shutdown signal");
                    break;
                }
                result = read_message(&mut reader, MAX_MESSAGE_SIZE) => {
                    match result {
                        Ok(Some(message)) => self.route(message).await,
                        Ok(None) => {
                            debug!("server closed its stdout");
                            break;
                        }
                        Err(e) => {
                            error!("transport decode error: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn route(self: &Arc<Self>, message: Value) {
        let id = message.get("id").and_then(|i| i.as_i64());
        let method = message.get("method").and_then(|m| m.as_str());

        match (id, method) {
            // Reply to one of our requests.
            (Some(id), None) => {
                let tx = self.pending.lock().unwrap().remove(&id);
                match tx {
                    Some(tx) => {
                        if tx.send(message).is_err() {
                            debug!(id, "reply arrived after caller gave up");
                        }
                    }
                    None => debug!(id, "reply for unknown request id"),
                }
            }
            // Server-to-client request. Prism implements none of them;
            // answer with MethodNotFound so the server does not stall.
            (Some(id), Some(method)) => {
                debug!(method, "declining server-to-client request");
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("method not supported: {method}") },
                });
                if let Err(e) = self.write(&reply).await {
                    warn!("failed to decline server request: {e}");
                }
            }
            // Notification.
            (None, Some(method)) => {
                let handler = self.handlers.lock().unwrap().get(method).cloned();
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                match handler {
                    Some(handler) => handler(method, params),
                    None => {
                        let catch_all = self.catch_all.lock().unwrap().clone();
                        match catch_all {
                            Some(handler) => handler(method, params),
                            None => debug!(method, "dropping unhandled notification"),
                        }
                    }
                }
            }
            (None, None) => warn!("message with neither id nor method"),
        }
    }

    fn mark_closed(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            // Dropping the senders fails every waiting caller.
            self.pending.lock().unwrap().clear();
            let observers = std::mem::take(&mut *self.close_observers.lock().unwrap());
            for observer in observers {
                observer();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::duplex;

    #[tokio::test]
    async fn framing_round_trip() {
        let mut buf = Vec::new();
        let message = json!({"jsonrpc": "2.0", "id": 7, "method": "ping", "params": {}});
        write_message(&mut buf, &message).await.unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Content-Length: "));
        assert!(text.contains("\r\n\r\n"));

        let mut reader = BufReader::new(&buf[..]);
        let decoded = read_message(&mut reader, MAX_MESSAGE_SIZE).await.unwrap().unwrap();
        assert_eq!(decoded, message);
        // Stream drained: next read is clean EOF.
        assert!(read_message(&mut reader, MAX_MESSAGE_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let mut buf = Vec::new();
        write_message(&mut buf, &json!({"data": "xxxxxxxxxx"})).await.unwrap();
        let mut reader = BufReader::new(&buf[..]);
        assert!(read_message(&mut reader, 4).await.is_err());
    }

    #[tokio::test]
    async fn missing_content_length_is_an_error() {
        let bytes = b"X-Other: 1\r\n\r\n{}";
        let mut reader = BufReader::new(&bytes[..]);
        assert!(read_message(&mut reader, MAX_MESSAGE_SIZE).await.is_err());
    }

    #[tokio::test]
    async fn replies_are_correlated_by_id() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = Transport::spawn(write_half, read_half);

        let rx = transport.send_request(1, "textDocument/hover", json!({})).await.unwrap();

        // Drain the request off the wire, then reply out of band.
        let mut server_reader = BufReader::new(&mut server_side);
        let request = read_message(&mut server_reader, MAX_MESSAGE_SIZE).await.unwrap().unwrap();
        assert_eq!(request["id"], 1);
        assert_eq!(request["method"], "textDocument/hover");

        write_message(&mut server_side, &json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}))
            .await
            .unwrap();

        let reply = rx.await.unwrap();
        assert_eq!(reply["result"]["ok"], true);
    }

    #[tokio::test]
    async fn notifications_reach_their_handler() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = Transport::spawn(write_half, read_half);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = seen.clone();
        transport.register_notification_handler(
            "textDocument/publishDiagnostics",
            Arc::new(move |_method, params| {
                assert_eq!(params["uri"], "file:///tmp/a.rs");
                seen_in_handler.fetch_add(1, Ordering::SeqCst);
            }),
        );

        write_message(
            &mut server_side,
            &json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": "file:///tmp/a.rs", "diagnostics": []},
            }),
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_requests_get_method_not_found() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let _transport = Transport::spawn(write_half, read_half);

        write_message(
            &mut server_side,
            &json!({"jsonrpc": "2.0", "id": 42, "method": "workspace/configuration", "params": {}}),
        )
        .await
        .unwrap();

        let mut server_reader = BufReader::new(&mut server_side);
        let reply = read_message(&mut server_reader, MAX_MESSAGE_SIZE).await.unwrap().unwrap();
        assert_eq!(reply["id"], 42);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn eof_fails_pending_requests_and_fires_close_observers() {
        let (client_side, server_side) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client_side);
        let transport = Transport::spawn(write_half, read_half);

        let closed = Arc::new(AtomicUsize::new(0));
        let closed_in_observer = closed.clone();
        transport.on_close(Box::new(move || {
            closed_in_observer.fetch_add(1, Ordering::SeqCst);
        }));

        let rx = transport.send_request(5, "textDocument/definition", json!({})).await.unwrap();
        drop(server_side);

        assert!(rx.await.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!transport.is_alive());
    }
}
