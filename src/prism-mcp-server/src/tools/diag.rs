//! Diagnostics operation, answered from the push-fed cache.

use super::DiagnosticsParams;
use crate::context::ToolContext;
use prism_lsp::{uri, LspError, SeverityFilter};
use serde_json::{json, Value};

pub async fn diagnostics(cx: &ToolContext, params: DiagnosticsParams) -> Result<Value, LspError> {
    let filter = match params.severity.as_deref() {
        None => SeverityFilter::All,
        Some(value) => SeverityFilter::parse(value).ok_or_else(|| {
            LspError::InvalidResponse(format!("unknown severity filter: {value}"))
        })?,
    };

    let path = cx.require_absolute(&params.file_path)?;
    // Opening the document subscribes it to the server's push stream.
    let (_client, uri) = cx.client_with_document(&path).await?;

    let all = cx.diagnostics.get(&uri);
    let filtered: Vec<Value> = all
        .iter()
        .filter(|d| filter.accepts(d.severity))
        .map(|d| serde_json::to_value(d).unwrap_or(Value::Null))
        .collect();
    let summary = cx.diagnostics.summary();

    Ok(json!({
        "file": uri::uri_to_path(&uri)?,
        "diagnostics": filtered,
        "summary": summary,
        "note": "diagnostics are the last snapshot pushed by the server and may be stale",
    }))
}
