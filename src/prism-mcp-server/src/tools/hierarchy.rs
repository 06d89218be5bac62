//! Call and type hierarchy operations.

use super::shape::{call_hierarchy_item_json, type_hierarchy_item_json};
use super::{CallDirection, CallHierarchyParams, TypeDirection, TypeHierarchyParams};
use crate::context::ToolContext;
use prism_lsp::LspError;
use serde_json::{json, Value};

pub async fn call_hierarchy(cx: &ToolContext, params: CallHierarchyParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let items = client.prepare_call_hierarchy(&uri, position).await?.unwrap_or_default();
    let Some(item) = items.first() else {
        return Ok(json!({ "item": Value::Null, "incoming": [], "outgoing": [] }));
    };

    let mut incoming = Vec::new();
    if matches!(params.direction, CallDirection::Incoming | CallDirection::Both) {
        for call in client.incoming_calls(item).await?.unwrap_or_default() {
            incoming.push(json!({
                "from": call_hierarchy_item_json(&call.from),
                "callSites": call.from_ranges.len(),
            }));
        }
    }

    let mut outgoing = Vec::new();
    if matches!(params.direction, CallDirection::Outgoing | CallDirection::Both) {
        for call in client.outgoing_calls(item).await?.unwrap_or_default() {
            outgoing.push(json!({
                "to": call_hierarchy_item_json(&call.to),
                "callSites": call.from_ranges.len(),
            }));
        }
    }

    Ok(json!({
        "item": call_hierarchy_item_json(item),
        "incoming": incoming,
        "outgoing": outgoing,
    }))
}

pub async fn type_hierarchy(cx: &ToolContext, params: TypeHierarchyParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let position = cx.lsp_position(&client, &uri, params.line, params.column, false).await?;

    let items = client.prepare_type_hierarchy(&uri, position).await?.unwrap_or_default();
    let Some(item) = items.first() else {
        return Ok(json!({ "item": Value::Null, "supertypes": [], "subtypes": [] }));
    };

    let mut supertypes = Vec::new();
    if matches!(params.direction, TypeDirection::Supertypes | TypeDirection::Both) {
        supertypes = client
            .supertypes(item)
            .await?
            .unwrap_or_default()
            .iter()
            .map(type_hierarchy_item_json)
            .collect();
    }

    let mut subtypes = Vec::new();
    if matches!(params.direction, TypeDirection::Subtypes | TypeDirection::Both) {
        subtypes = client
            .subtypes(item)
            .await?
            .unwrap_or_default()
            .iter()
            .map(type_hierarchy_item_json)
            .collect();
    }

    Ok(json!({
        "item": type_hierarchy_item_json(item),
        "supertypes": supertypes,
        "subtypes": subtypes,
    }))
}
