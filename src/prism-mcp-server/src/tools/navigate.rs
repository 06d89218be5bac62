//! Navigation operations: definition, type definition, references,
//! implementations.

use super::shape::{definition_locations, location_json};
use super::{FilePositionParams, ImplementationsParams, ReferencesParams};
use crate::context::ToolContext;
use lsp_types::request::GotoImplementationResponse;
use prism_lsp::LspError;
use serde_json::{json, Value};

pub async fn goto_definition(cx: &ToolContext, params: FilePositionParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let locations = match client.goto_definition(&uri, position).await? {
        Some(response) => definition_locations(response),
        None => Vec::new(),
    };
    Ok(json!({
        "definitions": locations.iter().map(location_json).collect::<Vec<_>>(),
    }))
}

pub async fn goto_type_definition(
    cx: &ToolContext,
    params: FilePositionParams,
) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let locations = match client.goto_type_definition(&uri, position).await? {
        Some(response) => definition_locations(response),
        None => Vec::new(),
    };
    Ok(json!({
        "typeDefinitions": locations.iter().map(location_json).collect::<Vec<_>>(),
    }))
}

pub async fn find_references(cx: &ToolContext, params: ReferencesParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let locations = client
        .find_references(&uri, position, params.include_declaration)
        .await?
        .unwrap_or_default();
    let total = locations.len();
    let page: Vec<Value> = locations
        .iter()
        .skip(params.offset)
        .take(params.limit)
        .map(location_json)
        .collect();
    Ok(json!({
        "references": page,
        "total": total,
        "offset": params.offset,
    }))
}

pub async fn find_implementations(
    cx: &ToolContext,
    params: ImplementationsParams,
) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let locations = match client.goto_implementation(&uri, position).await? {
        Some(GotoImplementationResponse::Scalar(location)) => vec![location],
        Some(GotoImplementationResponse::Array(locations)) => locations,
        Some(GotoImplementationResponse::Link(links)) => links
            .into_iter()
            .map(|link| lsp_types::Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
        None => Vec::new(),
    };
    let total = locations.len();
    let page: Vec<Value> = locations.iter().take(params.limit).map(location_json).collect();
    Ok(json!({ "implementations": page, "total": total }))
}
