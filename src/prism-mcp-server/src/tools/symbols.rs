//! Symbol operations: document outline, merged workspace search, and
//! the combined smart lookup.

use super::shape::{
    definition_locations, document_symbols_json, flatten_hover, location_json, merge_symbol_hits,
    SymbolHit,
};
use super::{FileParams, SmartSearchParams, WorkspaceSymbolsParams};
use crate::context::ToolContext;
use lsp_types::{OneOf, WorkspaceSymbolResponse};
use prism_lsp::LspError;
use serde_json::{json, Value};
use tracing::debug;

pub async fn document_symbols(cx: &ToolContext, params: FileParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;

    match client.document_symbols(&uri).await? {
        Some(response) => Ok(json!({ "symbols": document_symbols_json(response) })),
        None => Ok(json!({ "symbols": [] })),
    }
}

/// Fan the query out to every running client and merge the replies.
/// A server that fails or lacks the capability is skipped; its siblings
/// still answer.
pub async fn workspace_symbols(
    cx: &ToolContext,
    params: WorkspaceSymbolsParams,
) -> Result<Value, LspError> {
    let clients = cx.connections.running_clients().await;
    if clients.is_empty() {
        return Ok(json!({ "symbols": [], "note": "no language servers are running" }));
    }

    // Query every server concurrently; the slowest one bounds the call,
    // not the sum.
    let queries = clients.iter().map(|client| {
        let query = params.query.clone();
        async move { (client, client.workspace_symbols(&query).await) }
    });
    let replies = futures::future::join_all(queries).await;

    let mut hits: Vec<SymbolHit> = Vec::new();
    for (client, reply) in replies {
        let response = match reply {
            Ok(Some(response)) => response,
            Ok(None) => continue,
            Err(e) => {
                debug!(server = client.server_id(), "workspace symbol query failed: {e}");
                continue;
            }
        };
        match response {
            WorkspaceSymbolResponse::Flat(symbols) => {
                hits.extend(
                    symbols
                        .iter()
                        .map(|s| SymbolHit::from_symbol_information(s, client.server_id())),
                );
            }
            WorkspaceSymbolResponse::Nested(symbols) => {
                for symbol in symbols {
                    let location = match &symbol.location {
                        OneOf::Left(location) => location.clone(),
                        // Bare-uri hits carry no range; anchor them at 1:1.
                        OneOf::Right(workspace_location) => lsp_types::Location {
                            uri: workspace_location.uri.clone(),
                            range: Default::default(),
                        },
                    };
                    hits.push(SymbolHit {
                        name: symbol.name.clone(),
                        kind: super::shape::symbol_kind_name(symbol.kind).to_string(),
                        path: location.uri.to_file_path().unwrap_or_default(),
                        line: location.range.start.line + 1,
                        column: location.range.start.character + 1,
                        container: symbol.container_name.clone(),
                        server: client.server_id().to_string(),
                    });
                }
            }
        }
    }

    if let Some(kind) = &params.kind {
        hits.retain(|hit| hit.kind == *kind);
    }
    let merged = merge_symbol_hits(&params.query, hits, params.limit);
    Ok(json!({ "symbols": merged }))
}

/// One call covering the common "what is this symbol" loop. Sections a
/// server does not support are omitted rather than failing the call.
pub async fn smart_search(cx: &ToolContext, params: SmartSearchParams) -> Result<Value, LspError> {
    let include = params.include.unwrap_or_else(|| {
        vec![
            "definition".to_string(),
            "references".to_string(),
            "hover".to_string(),
            "implementations".to_string(),
        ]
    });

    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let mut result = serde_json::Map::new();

    if include.iter().any(|s| s == "definition") {
        match client.goto_definition(&uri, position).await {
            Ok(response) => {
                let locations = response.map(definition_locations).unwrap_or_default();
                result.insert(
                    "definitions".into(),
                    Value::Array(locations.iter().map(location_json).collect()),
                );
            }
            Err(LspError::CapabilityNotSupported(_)) => {}
            Err(e) => return Err(e),
        }
    }

    if include.iter().any(|s| s == "references") {
        match client.find_references(&uri, position, true).await {
            Ok(locations) => {
                let locations = locations.unwrap_or_default();
                result.insert("referenceCount".into(), json!(locations.len()));
                result.insert(
                    "references".into(),
                    Value::Array(locations.iter().take(25).map(location_json).collect()),
                );
            }
            Err(LspError::CapabilityNotSupported(_)) => {}
            Err(e) => return Err(e),
        }
    }

    if include.iter().any(|s| s == "hover") {
        match client.hover(&uri, position).await {
            Ok(hover) => {
                result.insert("hover".into(), hover.map(flatten_hover).map(Value::String).unwrap_or(Value::Null));
            }
            Err(LspError::CapabilityNotSupported(_)) => {}
            Err(e) => return Err(e),
        }
    }

    if include.iter().any(|s| s == "implementations") {
        match client.goto_implementation(&uri, position).await {
            Ok(response) => {
                let locations = match response {
                    Some(lsp_types::request::GotoImplementationResponse::Scalar(location)) => {
                        vec![location]
                    }
                    Some(lsp_types::request::GotoImplementationResponse::Array(locations)) => {
                        locations
                    }
                    Some(lsp_types::request::GotoImplementationResponse::Link(links)) => links
                        .into_iter()
                        .map(|link| lsp_types::Location {
                            uri: link.target_uri,
                            range: link.target_selection_range,
                        })
                        .collect(),
                    None => Vec::new(),
                };
                result.insert(
                    "implementations".into(),
                    Value::Array(locations.iter().map(location_json).collect()),
                );
            }
            Err(LspError::CapabilityNotSupported(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(Value::Object(result))
}
