//! Server administration operations.

use super::{ServerStartParams, ServerStatusParams, ServerStopParams};
use crate::context::ToolContext;
use prism_lsp::LspError;
use serde_json::{json, Value};
use std::path::Path;

pub async fn server_status(cx: &ToolContext, _params: ServerStatusParams) -> Result<Value, LspError> {
    let instances = cx.connections.list().await;
    let configured: Vec<Value> = cx
        .connections
        .registry()
        .all()
        .iter()
        .map(|config| {
            json!({
                "id": config.id,
                "name": config.name,
                "extensions": config.extensions,
                "disabled": config.disabled,
            })
        })
        .collect();
    Ok(json!({
        "instances": instances,
        "configured": configured,
        "diagnosticsCached": cx.diagnostics.total_count(),
    }))
}

pub async fn server_start(cx: &ToolContext, params: ServerStartParams) -> Result<Value, LspError> {
    let root = params.root.as_deref().map(Path::new);
    let client = cx.connections.start_server(&params.server, root).await?;
    Ok(json!({
        "server": params.server,
        "root": client.root(),
        "pid": client.pid(),
        "running": client.is_initialized(),
    }))
}

pub async fn server_stop(cx: &ToolContext, params: ServerStopParams) -> Result<Value, LspError> {
    let stopped = match params.root.as_deref() {
        Some(root) => {
            cx.connections.stop(&params.server, Path::new(root)).await?;
            1
        }
        None => cx.connections.stop_by_id(&params.server).await,
    };
    Ok(json!({ "server": params.server, "stopped": stopped }))
}
