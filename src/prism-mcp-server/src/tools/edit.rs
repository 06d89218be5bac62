//! Mutating operations: rename, code actions, formatting. All of them
//! dry-run unless `apply` is set, and applied edits must stay inside
//! the owning client's workspace root.

use super::shape::{apply_workspace_edit, range_json};
use super::{CodeActionsParams, FormatParams, RenameParams};
use crate::context::ToolContext;
use lsp_types::{
    CodeActionKind, CodeActionOrCommand, FormattingOptions, PrepareRenameResponse, Range,
    TextDocumentEdit, WorkspaceEdit,
};
use prism_lsp::{position, LspError};
use serde_json::{json, Value};

pub async fn rename(cx: &ToolContext, params: RenameParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    // Rename mutates: positions are validated, not clamped.
    let pos = cx.lsp_position(&client, &uri, params.line, params.column, true).await?;

    // Prepare gates the rename where the server supports it. A null
    // prepare result from a prepare-capable server is a rejection; from
    // a server without prepare it just means "go ahead".
    let prepare_supported = client.capabilities()?.prepare_rename;
    match client.prepare_rename(&uri, pos).await {
        Ok(Some(PrepareRenameResponse::DefaultBehavior { default_behavior: false })) => {
            return Err(LspError::RenameNotAllowed("server rejected the position".into()));
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            if prepare_supported {
                return Err(LspError::RenameNotAllowed(
                    "nothing renameable at this position".into(),
                ));
            }
        }
        Err(LspError::InvalidResponse(message)) => {
            return Err(LspError::RenameNotAllowed(message));
        }
        Err(e) => return Err(e),
    }

    let Some(edit) = client.rename(&uri, pos, &params.new_name).await? else {
        return Err(LspError::RenameNotAllowed("server produced no edit".into()));
    };

    let changes = apply_workspace_edit(edit, client.root(), params.apply).await?;
    Ok(json!({
        "newName": params.new_name,
        "applied": params.apply,
        "changes": changes,
    }))
}

pub async fn code_actions(cx: &ToolContext, params: CodeActionsParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;
    let text = cx.document_text(&client, &uri).await?;

    let start = position::to_lsp_position_clamped(
        &text,
        params.start_line.unwrap_or(1),
        params.start_column.unwrap_or(1),
    );
    let end = match (params.end_line, params.end_column) {
        (Some(line), column) => {
            position::to_lsp_position_clamped(&text, line, column.unwrap_or(u32::MAX))
        }
        // No explicit end: cover the whole document.
        (None, _) => position::to_lsp_position_clamped(&text, u32::MAX, u32::MAX),
    };
    let range = Range { start, end };

    let only = params
        .kind
        .as_ref()
        .map(|kind| vec![CodeActionKind::from(kind.clone())]);
    let actions = client.code_actions(&uri, range, only).await?.unwrap_or_default();

    if params.apply {
        // Apply the first edit-backed action in the filtered set.
        let edit = actions.iter().find_map(|action| match action {
            CodeActionOrCommand::CodeAction(action) => action.edit.clone(),
            CodeActionOrCommand::Command(_) => None,
        });
        let Some(edit) = edit else {
            return Err(LspError::InvalidResponse(
                "no applicable code action carries a workspace edit".into(),
            ));
        };
        let changes = apply_workspace_edit(edit, client.root(), true).await?;
        return Ok(json!({ "applied": true, "changes": changes }));
    }

    let shaped: Vec<Value> = actions
        .iter()
        .map(|action| match action {
            CodeActionOrCommand::CodeAction(action) => json!({
                "title": action.title,
                "kind": action.kind.as_ref().map(|k| k.as_str()),
                "hasEdit": action.edit.is_some(),
                "isPreferred": action.is_preferred,
            }),
            CodeActionOrCommand::Command(command) => json!({
                "title": command.title,
                "kind": "command",
                "hasEdit": false,
            }),
        })
        .collect();
    Ok(json!({ "applied": false, "actions": shaped }))
}

pub async fn format_document(cx: &ToolContext, params: FormatParams) -> Result<Value, LspError> {
    let path = cx.require_absolute(&params.file_path)?;
    let (client, uri) = cx.client_with_document(&path).await?;

    let options = FormattingOptions {
        tab_size: params.tab_size,
        insert_spaces: params.insert_spaces,
        ..Default::default()
    };
    let edits = client.format_document(&uri, options).await?.unwrap_or_default();
    if edits.is_empty() {
        return Ok(json!({ "applied": false, "changes": [], "note": "already formatted" }));
    }

    let edit = WorkspaceEdit {
        document_changes: Some(lsp_types::DocumentChanges::Edits(vec![TextDocumentEdit {
            text_document: lsp_types::OptionalVersionedTextDocumentIdentifier {
                uri: uri.clone(),
                version: None,
            },
            edits: edits.iter().cloned().map(lsp_types::OneOf::Left).collect(),
        }])),
        ..Default::default()
    };
    let changes = apply_workspace_edit(edit, client.root(), params.apply).await?;
    Ok(json!({
        "applied": params.apply,
        "changes": changes,
        "editRanges": edits.iter().map(|e| range_json(&e.range)).collect::<Vec<_>>(),
    }))
}
