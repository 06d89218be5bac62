//! Inspection operations: hover, signature help, completions.

use super::shape::{completions_json, flatten_hover};
use super::{CompletionsParams, FilePositionParams};
use crate::context::ToolContext;
use lsp_types::Documentation;
use prism_lsp::LspError;
use serde_json::{json, Value};

pub async fn hover(cx: &ToolContext, params: FilePositionParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    match client.hover(&uri, position).await? {
        Some(hover) => Ok(json!({ "contents": flatten_hover(hover) })),
        None => Ok(json!({ "contents": Value::Null })),
    }
}

pub async fn signature_help(cx: &ToolContext, params: FilePositionParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let Some(help) = client.signature_help(&uri, position).await? else {
        return Ok(json!({ "signatures": [] }));
    };

    let signatures: Vec<Value> = help
        .signatures
        .iter()
        .map(|signature| {
            let documentation = signature.documentation.as_ref().map(|doc| match doc {
                Documentation::String(s) => s.clone(),
                Documentation::MarkupContent(markup) => markup.value.clone(),
            });
            let parameters: Vec<Value> = signature
                .parameters
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .map(|parameter| json!({ "label": parameter.label }))
                .collect();
            json!({
                "label": signature.label,
                "documentation": documentation,
                "parameters": parameters,
            })
        })
        .collect();

    Ok(json!({
        "signatures": signatures,
        "activeSignature": help.active_signature,
        "activeParameter": help.active_parameter,
    }))
}

pub async fn completions(cx: &ToolContext, params: CompletionsParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    match client.completion(&uri, position).await? {
        Some(response) => Ok(completions_json(response, params.limit)),
        None => Ok(json!({ "items": [], "total": 0, "incomplete": false })),
    }
}
