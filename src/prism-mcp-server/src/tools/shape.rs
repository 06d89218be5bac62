//! Response shaping: translate LSP reply structures into the stable
//! JSON the agent sees, and apply server-proposed edits to disk.

use lsp_types::{
    CallHierarchyItem, CompletionResponse, DocumentSymbol, DocumentSymbolResponse,
    GotoDefinitionResponse, Hover, HoverContents, Location, MarkedString, Range, SymbolInformation,
    SymbolKind, TextEdit, TypeHierarchyItem, WorkspaceEdit,
};
use prism_lsp::{position, uri, LspError};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Flatten hover contents into one markdown-ish string.
pub fn flatten_hover(hover: Hover) -> String {
    fn marked(content: MarkedString) -> String {
        match content {
            MarkedString::String(s) => s,
            MarkedString::LanguageString(ls) => format!("```{}\n{}\n```", ls.language, ls.value),
        }
    }
    match hover.contents {
        HoverContents::Scalar(content) => marked(content),
        HoverContents::Array(contents) => {
            contents.into_iter().map(marked).collect::<Vec<_>>().join("\n\n")
        }
        HoverContents::Markup(markup) => markup.value,
    }
}

/// Stable lowercase names for LSP symbol kinds.
pub fn symbol_kind_name(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::FILE => "file",
        SymbolKind::MODULE => "module",
        SymbolKind::NAMESPACE => "namespace",
        SymbolKind::PACKAGE => "package",
        SymbolKind::CLASS => "class",
        SymbolKind::METHOD => "method",
        SymbolKind::PROPERTY => "property",
        SymbolKind::FIELD => "field",
        SymbolKind::CONSTRUCTOR => "constructor",
        SymbolKind::ENUM => "enum",
        SymbolKind::INTERFACE => "interface",
        SymbolKind::FUNCTION => "function",
        SymbolKind::VARIABLE => "variable",
        SymbolKind::CONSTANT => "constant",
        SymbolKind::STRING => "string",
        SymbolKind::NUMBER => "number",
        SymbolKind::BOOLEAN => "boolean",
        SymbolKind::ARRAY => "array",
        SymbolKind::OBJECT => "object",
        SymbolKind::KEY => "key",
        SymbolKind::NULL => "null",
        SymbolKind::ENUM_MEMBER => "enum_member",
        SymbolKind::STRUCT => "struct",
        SymbolKind::EVENT => "event",
        SymbolKind::OPERATOR => "operator",
        SymbolKind::TYPE_PARAMETER => "type_parameter",
        _ => "symbol",
    }
}

/// 1-based location JSON for one LSP location.
pub fn location_json(location: &Location) -> Value {
    let path = location.uri.to_file_path().unwrap_or_default();
    json!({
        "path": path,
        "line": location.range.start.line + 1,
        "column": location.range.start.character + 1,
    })
}

pub fn range_json(range: &Range) -> Value {
    json!({
        "start": { "line": range.start.line + 1, "column": range.start.character + 1 },
        "end": { "line": range.end.line + 1, "column": range.end.character + 1 },
    })
}

/// Collapse the three wire shapes of a definition reply into locations.
pub fn definition_locations(response: GotoDefinitionResponse) -> Vec<Location> {
    match response {
        GotoDefinitionResponse::Scalar(location) => vec![location],
        GotoDefinitionResponse::Array(locations) => locations,
        GotoDefinitionResponse::Link(links) => links
            .into_iter()
            .map(|link| Location { uri: link.target_uri, range: link.target_selection_range })
            .collect(),
    }
}

/// Document symbols come flat or nested; shape both as a uniform tree.
pub fn document_symbols_json(response: DocumentSymbolResponse) -> Value {
    fn nested(symbol: &DocumentSymbol) -> Value {
        let children: Vec<Value> =
            symbol.children.as_deref().unwrap_or(&[]).iter().map(nested).collect();
        json!({
            "name": symbol.name,
            "kind": symbol_kind_name(symbol.kind),
            "range": range_json(&symbol.range),
            "children": children,
        })
    }
    fn flat(symbol: &SymbolInformation) -> Value {
        json!({
            "name": symbol.name,
            "kind": symbol_kind_name(symbol.kind),
            "location": location_json(&symbol.location),
            "container": symbol.container_name,
        })
    }
    match response {
        DocumentSymbolResponse::Flat(symbols) => {
            Value::Array(symbols.iter().map(flat).collect())
        }
        DocumentSymbolResponse::Nested(symbols) => {
            Value::Array(symbols.iter().map(nested).collect())
        }
    }
}

/// Completion items, capped at `limit`.
pub fn completions_json(response: CompletionResponse, limit: usize) -> Value {
    let (items, incomplete) = match response {
        CompletionResponse::Array(items) => (items, false),
        CompletionResponse::List(list) => (list.items, list.is_incomplete),
    };
    let total = items.len();
    let shaped: Vec<Value> = items
        .into_iter()
        .take(limit)
        .map(|item| {
            json!({
                "label": item.label,
                "kind": item.kind.map(|k| format!("{k:?}")),
                "detail": item.detail,
                "insertText": item.insert_text,
            })
        })
        .collect();
    json!({ "items": shaped, "total": total, "incomplete": incomplete })
}

pub fn call_hierarchy_item_json(item: &CallHierarchyItem) -> Value {
    let path = item.uri.to_file_path().unwrap_or_default();
    json!({
        "name": item.name,
        "kind": symbol_kind_name(item.kind),
        "path": path,
        "line": item.selection_range.start.line + 1,
        "column": item.selection_range.start.character + 1,
        "detail": item.detail,
    })
}

pub fn type_hierarchy_item_json(item: &TypeHierarchyItem) -> Value {
    let path = item.uri.to_file_path().unwrap_or_default();
    json!({
        "name": item.name,
        "kind": symbol_kind_name(item.kind),
        "path": path,
        "line": item.selection_range.start.line + 1,
        "column": item.selection_range.start.character + 1,
        "detail": item.detail,
    })
}

// ---------------------------------------------------------------------------
// Workspace symbol merging
// ---------------------------------------------------------------------------

/// One workspace symbol hit, already shaped for the agent.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolHit {
    pub name: String,
    pub kind: String,
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub server: String,
}

impl SymbolHit {
    pub fn from_symbol_information(symbol: &SymbolInformation, server: &str) -> Self {
        Self {
            name: symbol.name.clone(),
            kind: symbol_kind_name(symbol.kind).to_string(),
            path: symbol.location.uri.to_file_path().unwrap_or_default(),
            line: symbol.location.range.start.line + 1,
            column: symbol.location.range.start.character + 1,
            container: symbol.container_name.clone(),
            server: server.to_string(),
        }
    }
}

/// Merge hits from several servers: drop duplicate (path, line, name)
/// triples, then order exact-case matches first, prefix matches second,
/// everything else last.
pub fn merge_symbol_hits(query: &str, hits: Vec<SymbolHit>, limit: usize) -> Vec<SymbolHit> {
    let mut seen: HashSet<(PathBuf, u32, String)> = HashSet::new();
    let mut unique: Vec<SymbolHit> = Vec::new();
    for hit in hits {
        if seen.insert((hit.path.clone(), hit.line, hit.name.clone())) {
            unique.push(hit);
        }
    }

    let query_lower = query.to_lowercase();
    let rank = |hit: &SymbolHit| -> u8 {
        if hit.name == query {
            0
        } else if hit.name.to_lowercase().starts_with(&query_lower) {
            1
        } else {
            2
        }
    };
    unique.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line.cmp(&b.line))
    });
    unique.truncate(limit);
    unique
}

// ---------------------------------------------------------------------------
// Edit application
// ---------------------------------------------------------------------------

/// Outcome of one file touched by a workspace edit.
#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    pub path: PathBuf,
    pub edits: usize,
    pub applied: bool,
}

/// Apply LSP text edits to a document. Edits are applied bottom-up so
/// earlier offsets stay valid.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut spans: Vec<(usize, usize, &str)> = edits
        .iter()
        .map(|edit| {
            let start = position::lsp_position_to_byte_offset(text, edit.range.start);
            let end = position::lsp_position_to_byte_offset(text, edit.range.end);
            (start, end.max(start), edit.new_text.as_str())
        })
        .collect();
    spans.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut result = text.to_string();
    for (start, end, new_text) in spans {
        result.replace_range(start..end, new_text);
    }
    result
}

/// Flatten a workspace edit into per-file edit lists.
fn collect_file_edits(edit: WorkspaceEdit) -> Result<Vec<(lsp_types::Url, Vec<TextEdit>)>, LspError> {
    let mut files = Vec::new();
    if let Some(changes) = edit.changes {
        for (uri, edits) in changes {
            files.push((uri, edits));
        }
    }
    fn flatten(doc_edit: lsp_types::TextDocumentEdit) -> (lsp_types::Url, Vec<TextEdit>) {
        let edits = doc_edit
            .edits
            .into_iter()
            .map(|edit| match edit {
                lsp_types::OneOf::Left(text_edit) => text_edit,
                lsp_types::OneOf::Right(annotated) => annotated.text_edit,
            })
            .collect();
        (doc_edit.text_document.uri, edits)
    }

    if let Some(document_changes) = edit.document_changes {
        match document_changes {
            lsp_types::DocumentChanges::Edits(edits) => {
                files.extend(edits.into_iter().map(flatten));
            }
            lsp_types::DocumentChanges::Operations(operations) => {
                for operation in operations {
                    match operation {
                        lsp_types::DocumentChangeOperation::Edit(doc_edit) => {
                            files.push(flatten(doc_edit));
                        }
                        // create/rename/delete never touch disk through prism.
                        lsp_types::DocumentChangeOperation::Op(_) => {
                            return Err(LspError::InvalidResponse(
                                "workspace edits with resource operations are not supported".into(),
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(files)
}

/// Apply (or dry-run) a workspace edit. Every touched path must resolve
/// inside `root`; anything else rejects the whole edit before any file
/// is written.
pub async fn apply_workspace_edit(
    edit: WorkspaceEdit,
    root: &Path,
    apply: bool,
) -> Result<Vec<FileChange>, LspError> {
    let files = collect_file_edits(edit)?;

    let mut planned: Vec<(PathBuf, Vec<TextEdit>)> = Vec::new();
    for (url, edits) in files {
        let path = uri::uri_to_path(&url)?;
        uri::ensure_within_root(&path, root)?;
        planned.push((path, edits));
    }

    let mut changes = Vec::new();
    for (path, edits) in planned {
        if apply {
            let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                LspError::FileNotReadable(format!("{}: {e}", path.display()))
            })?;
            let updated = apply_text_edits(&text, &edits);
            tokio::fs::write(&path, updated).await?;
        }
        changes.push(FileChange { path, edits: edits.len(), applied: apply });
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;

    fn hit(name: &str, path: &str, line: u32) -> SymbolHit {
        SymbolHit {
            name: name.to_string(),
            kind: "function".to_string(),
            path: PathBuf::from(path),
            line,
            column: 1,
            container: None,
            server: "typescript".to_string(),
        }
    }

    #[test]
    fn merge_dedups_and_orders() {
        let hits = vec![
            hit("fooBar", "/p/a.ts", 10),
            hit("Foo", "/p/b.ts", 2),
            hit("barFoo", "/p/c.py", 3),
            // Duplicate triple from a second server.
            hit("Foo", "/p/b.ts", 2),
            hit("Foolish", "/p/d.py", 7),
        ];
        let merged = merge_symbol_hits("Foo", hits, 10);
        let names: Vec<&str> = merged.iter().map(|h| h.name.as_str()).collect();
        // Exact-case first, prefix matches next, the rest last.
        assert_eq!(names, vec!["Foo", "fooBar", "Foolish", "barFoo"]);
    }

    #[test]
    fn merge_respects_limit() {
        let hits = vec![hit("a", "/1", 1), hit("b", "/2", 1), hit("c", "/3", 1)];
        assert_eq!(merge_symbol_hits("a", hits, 2).len(), 2);
    }

    #[test]
    fn text_edits_apply_bottom_up() {
        let text = "let x = 1;\nlet y = 2;\n";
        let edits = vec![
            TextEdit {
                range: Range {
                    start: Position { line: 0, character: 4 },
                    end: Position { line: 0, character: 5 },
                },
                new_text: "renamed".to_string(),
            },
            TextEdit {
                range: Range {
                    start: Position { line: 1, character: 4 },
                    end: Position { line: 1, character: 5 },
                },
                new_text: "other".to_string(),
            },
        ];
        assert_eq!(apply_text_edits(text, &edits), "let renamed = 1;\nlet other = 2;\n");
    }

    #[test]
    fn insertion_edit_has_empty_range() {
        let text = "fn main() {}\n";
        let edits = vec![TextEdit {
            range: Range {
                start: Position { line: 0, character: 0 },
                end: Position { line: 0, character: 0 },
            },
            new_text: "// header\n".to_string(),
        }];
        assert_eq!(apply_text_edits(text, &edits), "// header\nfn main() {}\n");
    }

    #[tokio::test]
    async fn workspace_edit_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("src.rs");
        std::fs::write(&inside, "fn a() {}").unwrap();

        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("other.rs");
        std::fs::write(&victim, "fn b() {}").unwrap();

        let mut changes = std::collections::HashMap::new();
        changes.insert(
            lsp_types::Url::from_file_path(&victim).unwrap(),
            vec![TextEdit {
                range: Range {
                    start: Position { line: 0, character: 0 },
                    end: Position { line: 0, character: 0 },
                },
                new_text: "x".to_string(),
            }],
        );
        let edit = WorkspaceEdit { changes: Some(changes), ..Default::default() };

        let result = apply_workspace_edit(edit, dir.path(), true).await;
        assert!(result.is_err());
        // Nothing was written.
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "fn b() {}");
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src.rs");
        std::fs::write(&file, "fn a() {}").unwrap();

        let mut changes = std::collections::HashMap::new();
        changes.insert(
            lsp_types::Url::from_file_path(&file).unwrap(),
            vec![TextEdit {
                range: Range {
                    start: Position { line: 0, character: 3 },
                    end: Position { line: 0, character: 4 },
                },
                new_text: "b".to_string(),
            }],
        );
        let edit = WorkspaceEdit { changes: Some(changes), ..Default::default() };

        let report = apply_workspace_edit(edit, dir.path(), false).await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].edits, 1);
        assert!(!report[0].applied);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "fn a() {}");
    }

    #[test]
    fn hover_flattening() {
        let hover = Hover {
            contents: HoverContents::Array(vec![
                MarkedString::String("summary".into()),
                MarkedString::LanguageString(lsp_types::LanguageString {
                    language: "rust".into(),
                    value: "fn x()".into(),
                }),
            ]),
            range: None,
        };
        assert_eq!(flatten_hover(hover), "summary\n\n```rust\nfn x()\n```");
    }
}
