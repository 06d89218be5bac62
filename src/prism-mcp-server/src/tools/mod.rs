//! The inbound tool surface.
//!
//! Every operation has a stable name, a literal JSON schema advertised
//! over `tools/list`, and a typed params struct its arguments must
//! deserialize into. The tagged [`ToolRequest`] enum routes each parsed
//! call to exactly one handler.

mod admin;
mod diag;
mod edit;
mod hierarchy;
mod inspect;
mod navigate;
pub mod shape;
mod symbols;

use crate::context::ToolContext;
use crate::protocol::Tool;
use prism_lsp::LspError;
use serde::Deserialize;
use serde_json::{json, Value};

fn default_true() -> bool {
    true
}

fn default_limit() -> usize {
    50
}

fn default_references_limit() -> usize {
    100
}

fn default_tab_size() -> u32 {
    4
}

#[derive(Debug, Deserialize)]
pub struct FilePositionParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Deserialize)]
pub struct FileParams {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ReferencesParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default = "default_true")]
    pub include_declaration: bool,
    #[serde(default = "default_references_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct ImplementationsParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceSymbolsParams {
    pub query: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosticsParams {
    pub file_path: String,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionsParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct RenameParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub new_name: String,
    /// Mutating operations default to dry-run.
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Deserialize)]
pub struct CodeActionsParams {
    pub file_path: String,
    #[serde(default)]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub start_column: Option<u32>,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub end_column: Option<u32>,
    /// Code action kind prefix filter, e.g. `"quickfix"`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Deserialize)]
pub struct FormatParams {
    pub file_path: String,
    #[serde(default = "default_tab_size")]
    pub tab_size: u32,
    #[serde(default = "default_true")]
    pub insert_spaces: bool,
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Incoming,
    Outgoing,
    #[default]
    Both,
}

#[derive(Debug, Deserialize)]
pub struct CallHierarchyParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub direction: CallDirection,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TypeDirection {
    Supertypes,
    Subtypes,
    #[default]
    Both,
}

#[derive(Debug, Deserialize)]
pub struct TypeHierarchyParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub direction: TypeDirection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerStatusParams {}

#[derive(Debug, Deserialize)]
pub struct ServerStartParams {
    pub server: String,
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerStopParams {
    pub server: String,
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SmartSearchParams {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    /// Subset of: definition, references, hover, implementations.
    #[serde(default)]
    pub include: Option<Vec<String>>,
}

/// Every operation the agent can call, with its parsed arguments.
#[derive(Debug)]
pub enum ToolRequest {
    GotoDefinition(FilePositionParams),
    GotoTypeDefinition(FilePositionParams),
    FindReferences(ReferencesParams),
    FindImplementations(ImplementationsParams),
    Hover(FilePositionParams),
    SignatureHelp(FilePositionParams),
    DocumentSymbols(FileParams),
    WorkspaceSymbols(WorkspaceSymbolsParams),
    Diagnostics(DiagnosticsParams),
    Completions(CompletionsParams),
    Rename(RenameParams),
    CodeActions(CodeActionsParams),
    FormatDocument(FormatParams),
    CallHierarchy(CallHierarchyParams),
    TypeHierarchy(TypeHierarchyParams),
    ServerStatus(ServerStatusParams),
    ServerStart(ServerStartParams),
    ServerStop(ServerStopParams),
    SmartSearch(SmartSearchParams),
}

impl ToolRequest {
    /// Validate a raw tool call against its operation's params shape.
    pub fn parse(name: &str, arguments: Value) -> Result<Self, String> {
        fn from<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, String> {
            serde_json::from_value(arguments).map_err(|e| e.to_string())
        }
        match name {
            "goto_definition" => Ok(Self::GotoDefinition(from(arguments)?)),
            "goto_type_definition" => Ok(Self::GotoTypeDefinition(from(arguments)?)),
            "find_references" => Ok(Self::FindReferences(from(arguments)?)),
            "find_implementations" => Ok(Self::FindImplementations(from(arguments)?)),
            "hover" => Ok(Self::Hover(from(arguments)?)),
            "signature_help" => Ok(Self::SignatureHelp(from(arguments)?)),
            "document_symbols" => Ok(Self::DocumentSymbols(from(arguments)?)),
            "workspace_symbols" => Ok(Self::WorkspaceSymbols(from(arguments)?)),
            "diagnostics" => Ok(Self::Diagnostics(from(arguments)?)),
            "completions" => Ok(Self::Completions(from(arguments)?)),
            "rename" => Ok(Self::Rename(from(arguments)?)),
            "code_actions" => Ok(Self::CodeActions(from(arguments)?)),
            "format_document" => Ok(Self::FormatDocument(from(arguments)?)),
            "call_hierarchy" => Ok(Self::CallHierarchy(from(arguments)?)),
            "type_hierarchy" => Ok(Self::TypeHierarchy(from(arguments)?)),
            "server_status" => Ok(Self::ServerStatus(from(arguments)?)),
            "server_start" => Ok(Self::ServerStart(from(arguments)?)),
            "server_stop" => Ok(Self::ServerStop(from(arguments)?)),
            "smart_search" => Ok(Self::SmartSearch(from(arguments)?)),
            other => Err(format!("unknown tool: {other}")),
        }
    }

    /// One handler per variant.
    pub async fn execute(self, cx: &ToolContext) -> Result<Value, LspError> {
        match self {
            Self::GotoDefinition(params) => navigate::goto_definition(cx, params).await,
            Self::GotoTypeDefinition(params) => navigate::goto_type_definition(cx, params).await,
            Self::FindReferences(params) => navigate::find_references(cx, params).await,
            Self::FindImplementations(params) => navigate::find_implementations(cx, params).await,
            Self::Hover(params) => inspect::hover(cx, params).await,
            Self::SignatureHelp(params) => inspect::signature_help(cx, params).await,
            Self::DocumentSymbols(params) => symbols::document_symbols(cx, params).await,
            Self::WorkspaceSymbols(params) => symbols::workspace_symbols(cx, params).await,
            Self::Diagnostics(params) => diag::diagnostics(cx, params).await,
            Self::Completions(params) => inspect::completions(cx, params).await,
            Self::Rename(params) => edit::rename(cx, params).await,
            Self::CodeActions(params) => edit::code_actions(cx, params).await,
            Self::FormatDocument(params) => edit::format_document(cx, params).await,
            Self::CallHierarchy(params) => hierarchy::call_hierarchy(cx, params).await,
            Self::TypeHierarchy(params) => hierarchy::type_hierarchy(cx, params).await,
            Self::ServerStatus(params) => admin::server_status(cx, params).await,
            Self::ServerStart(params) => admin::server_start(cx, params).await,
            Self::ServerStop(params) => admin::server_stop(cx, params).await,
            Self::SmartSearch(params) => symbols::smart_search(cx, params).await,
        }
    }
}

fn position_schema(extra: Value) -> Value {
    let mut properties = json!({
        "file_path": { "type": "string", "description": "Absolute path to the file" },
        "line": { "type": "integer", "minimum": 1, "description": "1-based line" },
        "column": { "type": "integer", "minimum": 1, "description": "1-based column" },
    });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["file_path", "line", "column"],
    })
}

/// The advertised tool catalog.
pub fn catalog() -> Vec<Tool> {
    vec![
        Tool::new(
            "goto_definition",
            "Find where the symbol at a position is defined",
            position_schema(json!({})),
        ),
        Tool::new(
            "goto_type_definition",
            "Find the type definition of the symbol at a position",
            position_schema(json!({})),
        ),
        Tool::new(
            "find_references",
            "List references to the symbol at a position",
            position_schema(json!({
                "include_declaration": { "type": "boolean", "default": true },
                "limit": { "type": "integer", "default": 100 },
                "offset": { "type": "integer", "default": 0 },
            })),
        ),
        Tool::new(
            "find_implementations",
            "List implementations of the interface or trait at a position",
            position_schema(json!({ "limit": { "type": "integer", "default": 50 } })),
        ),
        Tool::new(
            "hover",
            "Type and documentation for the symbol at a position",
            position_schema(json!({})),
        ),
        Tool::new(
            "signature_help",
            "Signature help for the call at a position",
            position_schema(json!({})),
        ),
        Tool::new(
            "document_symbols",
            "Symbol outline of one document",
            json!({
                "type": "object",
                "properties": { "file_path": { "type": "string" } },
                "required": ["file_path"],
            }),
        ),
        Tool::new(
            "workspace_symbols",
            "Search symbols across every running server; results are merged and deduplicated",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "kind": { "type": "string", "description": "Optional symbol kind filter, e.g. function" },
                    "limit": { "type": "integer", "default": 50 },
                },
                "required": ["query"],
            }),
        ),
        Tool::new(
            "diagnostics",
            "Cached diagnostics for a file (may lag the latest server push)",
            json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "severity": { "type": "string", "enum": ["all", "error", "warning", "info", "hint"] },
                },
                "required": ["file_path"],
            }),
        ),
        Tool::new(
            "completions",
            "Completion items at a position",
            position_schema(json!({ "limit": { "type": "integer", "default": 50 } })),
        ),
        Tool::new(
            "rename",
            "Rename the symbol at a position; dry-run unless apply is true",
            position_schema(json!({
                "new_name": { "type": "string" },
                "apply": { "type": "boolean", "default": false },
            })),
        ),
        Tool::new(
            "code_actions",
            "Code actions for a range; optionally apply one edit-backed action",
            json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "start_line": { "type": "integer", "minimum": 1 },
                    "start_column": { "type": "integer", "minimum": 1 },
                    "end_line": { "type": "integer", "minimum": 1 },
                    "end_column": { "type": "integer", "minimum": 1 },
                    "kind": { "type": "string", "description": "Kind prefix filter, e.g. quickfix" },
                    "apply": { "type": "boolean", "default": false },
                },
                "required": ["file_path"],
            }),
        ),
        Tool::new(
            "format_document",
            "Format a document; dry-run unless apply is true",
            json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "tab_size": { "type": "integer", "default": 4 },
                    "insert_spaces": { "type": "boolean", "default": true },
                    "apply": { "type": "boolean", "default": false },
                },
                "required": ["file_path"],
            }),
        ),
        Tool::new(
            "call_hierarchy",
            "Incoming and outgoing calls for the function at a position",
            position_schema(json!({
                "direction": { "type": "string", "enum": ["incoming", "outgoing", "both"], "default": "both" },
            })),
        ),
        Tool::new(
            "type_hierarchy",
            "Supertypes and subtypes of the type at a position",
            position_schema(json!({
                "direction": { "type": "string", "enum": ["supertypes", "subtypes", "both"], "default": "both" },
            })),
        ),
        Tool::new(
            "server_status",
            "List configured servers and the state of every running instance",
            json!({ "type": "object", "properties": {} }),
        ),
        Tool::new(
            "server_start",
            "Start a language server explicitly",
            json!({
                "type": "object",
                "properties": {
                    "server": { "type": "string", "description": "Server id, e.g. typescript" },
                    "root": { "type": "string", "description": "Workspace root; defaults to the detected root" },
                },
                "required": ["server"],
            }),
        ),
        Tool::new(
            "server_stop",
            "Stop a language server (all roots unless one is given)",
            json!({
                "type": "object",
                "properties": {
                    "server": { "type": "string" },
                    "root": { "type": "string" },
                },
                "required": ["server"],
            }),
        ),
        Tool::new(
            "smart_search",
            "Combined lookup at a position: definition, references, hover and implementations in one call",
            position_schema(json!({
                "include": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["definition", "references", "hover", "implementations"] },
                },
            })),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_and_parser_agree_on_names() {
        for tool in catalog() {
            // Parsing with empty args must fail on schema grounds, never
            // with "unknown tool".
            let result = ToolRequest::parse(&tool.name, json!({}));
            if let Err(message) = result {
                assert!(
                    !message.starts_with("unknown tool"),
                    "catalog tool {} is not routed",
                    tool.name
                );
            }
        }
        assert!(ToolRequest::parse("no_such_tool", json!({})).is_err());
    }

    #[test]
    fn position_params_validate_required_fields() {
        assert!(ToolRequest::parse("hover", json!({"file_path": "/a.rs"})).is_err());
        assert!(ToolRequest::parse(
            "hover",
            json!({"file_path": "/a.rs", "line": 1, "column": 2})
        )
        .is_ok());
    }

    #[test]
    fn defaults_fill_in() {
        let request = ToolRequest::parse(
            "find_references",
            json!({"file_path": "/a.rs", "line": 3, "column": 4}),
        )
        .unwrap();
        match request {
            ToolRequest::FindReferences(params) => {
                assert!(params.include_declaration);
                assert_eq!(params.limit, 100);
                assert_eq!(params.offset, 0);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn direction_parsing() {
        let request = ToolRequest::parse(
            "call_hierarchy",
            json!({"file_path": "/a.rs", "line": 1, "column": 1, "direction": "incoming"}),
        )
        .unwrap();
        match request {
            ToolRequest::CallHierarchy(params) => {
                assert_eq!(params.direction, CallDirection::Incoming)
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
