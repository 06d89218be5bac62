//! The agent-facing JSON-RPC server over process stdio.
//!
//! Messages are newline-delimited JSON objects. Requests are handled
//! concurrently — a slow language server must not block unrelated tool
//! calls — and replies are serialized through one stdout writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::context::ToolContext;
use crate::jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::protocol::{
    methods, CallToolParams, CallToolResult, CancelledParams, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, ServerCapabilities, ToolsCapability, PROTOCOL_VERSION,
};
use crate::tools::{self, ToolRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Stopped,
}

/// The Prism agent server: one controlling agent, many language servers.
pub struct AgentServer {
    info: Implementation,
    context: Arc<ToolContext>,
    state: RwLock<ServerState>,
    running: AtomicBool,
    client_info: RwLock<Option<Implementation>>,
    /// In-flight tool calls by request id, for cancellation.
    in_flight: Mutex<HashMap<String, tokio::task::AbortHandle>>,
}

impl AgentServer {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self {
            info: Implementation::new("prism", env!("CARGO_PKG_VERSION")),
            context,
            state: RwLock::new(ServerState::Uninitialized),
            running: AtomicBool::new(false),
            client_info: RwLock::new(None),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<ToolContext> {
        &self.context
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, id = %request.id, "handling request");
        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request.params).await,
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => self.handle_list_tools().await,
            methods::TOOLS_CALL => self.handle_call_tool(request.params).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };
        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        }
    }

    pub async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => {
                *self.state.write().await = ServerState::Ready;
                info!("agent connected and ready");
            }
            methods::CANCELLED => {
                let Some(params) = notification.params else { return };
                let Ok(cancelled) = serde_json::from_value::<CancelledParams>(params) else {
                    return;
                };
                let handle = self
                    .in_flight
                    .lock()
                    .await
                    .remove(&cancelled.request_id.to_string());
                if let Some(handle) = handle {
                    handle.abort();
                    debug!(id = %cancelled.request_id, "cancelled in-flight tool call");
                }
            }
            other => warn!(method = %other, "unknown notification"),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Uninitialized {
                return Err(JsonRpcError::invalid_request("server already initialized"));
            }
            *state = ServerState::Initializing;
        }

        let init: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(format!("invalid params: {e}")))?
            .unwrap_or_default();

        info!(
            client = %init.client_info.name,
            version = %init.client_info.version,
            "agent initializing"
        );
        *self.client_info.write().await = Some(init.client_info);

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: Some(false) }),
            },
            server_info: self.info.clone(),
            instructions: Some(
                "Language server tools. Paths are absolute; lines and columns are 1-based."
                    .to_string(),
            ),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    async fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult { tools: tools::catalog() };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let call: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("missing params"))
            .and_then(|params| {
                serde_json::from_value(params)
                    .map_err(|e| JsonRpcError::invalid_params(format!("invalid params: {e}")))
            })?;

        let arguments = call.arguments.unwrap_or_else(|| json!({}));
        let request = ToolRequest::parse(&call.name, arguments)
            .map_err(|e| JsonRpcError::invalid_params(format!("{}: {e}", call.name)))?;

        debug!(tool = %call.name, "executing tool");
        let result = match request.execute(&self.context).await {
            Ok(value) => CallToolResult::json(&value),
            Err(e) => {
                // Stable code + message + suggestion, as one error payload.
                let payload = json!({
                    "code": e.code(),
                    "message": e.to_string(),
                    "suggestion": e.suggestion(),
                });
                CallToolResult::error(
                    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string()),
                )
            }
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Serve the agent over stdin/stdout until EOF or stop.
    pub async fn run_stdio(self: Arc<Self>) -> Result<()> {
        info!(server = %self.info.name, "serving agent over stdio");
        self.running.store(true, Ordering::SeqCst);

        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
        let mut lines = stdin.lines();

        while self.running.load(Ordering::SeqCst) {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("agent closed stdin");
                    break;
                }
                Err(e) => {
                    error!("error reading stdin: {e}");
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(trimmed) {
                // Handle concurrently so one slow server cannot stall the
                // channel; the id keyed registry makes the call cancellable.
                let id_key = request.id.to_string();
                let server = self.clone();
                let stdout = stdout.clone();
                let task = tokio::spawn(async move {
                    let response = server.handle_request(request).await;
                    server.in_flight.lock().await.remove(&response.id.to_string());
                    if let Err(e) = write_response(&stdout, &response).await {
                        error!("failed to write response: {e}");
                    }
                });
                let mut in_flight = self.in_flight.lock().await;
                in_flight.insert(id_key.clone(), task.abort_handle());
                // The task may have finished before we registered it.
                if task.is_finished() {
                    in_flight.remove(&id_key);
                }
            } else if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(trimmed) {
                self.handle_notification(notification).await;
            } else {
                warn!("invalid JSON-RPC message");
                let response = JsonRpcResponse::error(
                    RequestId::Number(0),
                    JsonRpcError::parse_error("invalid JSON"),
                );
                let _ = write_response(&stdout, &response).await;
            }
        }

        *self.state.write().await = ServerState::Stopped;
        self.running.store(false, Ordering::SeqCst);
        info!("agent server stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.state.write().await = ServerState::ShuttingDown;
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn write_response(
    stdout: &Mutex<tokio::io::Stdout>,
    response: &JsonRpcResponse,
) -> Result<()> {
    let serialized = serde_json::to_string(response).context("serialize response")?;
    let mut stdout = stdout.lock().await;
    stdout.write_all(serialized.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
