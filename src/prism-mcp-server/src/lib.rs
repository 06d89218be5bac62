//! Prism agent server: the stdio shell in front of the LSP fabric.
//!
//! Speaks JSON-RPC 2.0 with a controlling agent (initialize handshake,
//! `tools/list`, `tools/call`, cancellation) and routes every tool call
//! through the typed [`tools::ToolRequest`] registry into `prism-lsp`.

mod context;
mod jsonrpc;
mod protocol;
mod server;
pub mod tools;

pub use context::ToolContext;
pub use jsonrpc::{
    ErrorCode, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    JSONRPC_VERSION,
};
pub use protocol::{
    methods, CallToolParams, CallToolResult, Content, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, ServerCapabilities, Tool, PROTOCOL_VERSION,
};
pub use server::{AgentServer, ServerState};

#[cfg(test)]
mod tests {
    use super::*;
    use prism_lsp::Settings;
    use serde_json::json;
    use std::sync::Arc;

    fn test_server() -> Arc<AgentServer> {
        let context = Arc::new(ToolContext::new(Settings::default(), None));
        Arc::new(AgentServer::new(context))
    }

    #[tokio::test]
    async fn initialize_handshake() {
        let server = test_server();
        assert_eq!(server.state().await, ServerState::Uninitialized);

        let request = JsonRpcRequest::new(1, methods::INITIALIZE).with_params(json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": { "name": "agent", "version": "1.0" },
            "capabilities": {},
        }));
        let response = server.handle_request(request).await;
        assert!(response.is_success());

        let result: InitializeResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.server_info.name, "prism");
        assert!(result.capabilities.tools.is_some());
        assert_eq!(server.state().await, ServerState::Initializing);

        server
            .handle_notification(JsonRpcNotification::new(methods::INITIALIZED))
            .await;
        assert_eq!(server.state().await, ServerState::Ready);
    }

    #[tokio::test]
    async fn double_initialize_is_rejected() {
        let server = test_server();
        let request = JsonRpcRequest::new(1, methods::INITIALIZE);
        assert!(server.handle_request(request).await.is_success());

        let request = JsonRpcRequest::new(2, methods::INITIALIZE);
        let response = server.handle_request(request).await;
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn tools_list_covers_every_operation() {
        let server = test_server();
        let response = server.handle_request(JsonRpcRequest::new(1, methods::TOOLS_LIST)).await;
        assert!(response.is_success());

        let result: ListToolsResult = serde_json::from_value(response.result.unwrap()).unwrap();
        let names: Vec<&str> = result.tools.iter().map(|t| t.name.as_str()).collect();
        for expected in [
            "goto_definition",
            "goto_type_definition",
            "find_references",
            "find_implementations",
            "hover",
            "signature_help",
            "document_symbols",
            "workspace_symbols",
            "diagnostics",
            "completions",
            "rename",
            "code_actions",
            "format_document",
            "call_hierarchy",
            "type_hierarchy",
            "server_status",
            "server_start",
            "server_stop",
            "smart_search",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let server = test_server();
        let response = server.handle_request(JsonRpcRequest::new(1, "no/such")).await;
        assert!(response.is_error());
        assert_eq!(response.error.unwrap().code, ErrorCode::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let server = test_server();
        let request = JsonRpcRequest::new(1, methods::TOOLS_CALL)
            .with_params(json!({ "name": "frobnicate", "arguments": {} }));
        let response = server.handle_request(request).await;
        assert!(response.is_error());
        assert_eq!(response.error.unwrap().code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn malformed_tool_arguments_are_invalid_params() {
        let server = test_server();
        let request = JsonRpcRequest::new(1, methods::TOOLS_CALL)
            .with_params(json!({ "name": "hover", "arguments": { "file_path": 42 } }));
        let response = server.handle_request(request).await;
        assert!(response.is_error());
        assert_eq!(response.error.unwrap().code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unsupported_extension_surfaces_stable_error_code() {
        let server = test_server();
        let request = JsonRpcRequest::new(1, methods::TOOLS_CALL).with_params(json!({
            "name": "goto_definition",
            "arguments": { "file_path": "/tmp/x.unknownext", "line": 1, "column": 1 },
        }));
        let response = server.handle_request(request).await;
        assert!(response.is_success());

        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(result.is_error());
        let text = result.content[0].as_text().unwrap();
        assert!(text.contains("unsupported-language"), "got: {text}");

        // No subprocess was started on the way to that error.
        let status = server.context().connections.list().await;
        assert!(status.is_empty());
    }

    #[tokio::test]
    async fn relative_paths_are_rejected() {
        let server = test_server();
        let request = JsonRpcRequest::new(1, methods::TOOLS_CALL).with_params(json!({
            "name": "hover",
            "arguments": { "file_path": "relative/main.rs", "line": 1, "column": 1 },
        }));
        let response = server.handle_request(request).await;
        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(result.is_error());
        assert!(result.content[0].as_text().unwrap().contains("absolute"));
    }

    #[tokio::test]
    async fn server_status_lists_builtins() {
        let server = test_server();
        let request = JsonRpcRequest::new(1, methods::TOOLS_CALL)
            .with_params(json!({ "name": "server_status", "arguments": {} }));
        let response = server.handle_request(request).await;
        assert!(response.is_success());

        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(!result.is_error());
        let payload: serde_json::Value =
            serde_json::from_str(result.content[0].as_text().unwrap()).unwrap();
        assert!(payload["configured"].as_array().unwrap().len() >= 10);
        assert_eq!(payload["instances"], json!([]));
    }
}
