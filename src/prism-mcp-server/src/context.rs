//! Shared state injected into every tool handler.

use lsp_types::{Position, Url};
use prism_lsp::{
    position, uri, ConnectionManager, DiagnosticsCache, DocumentManager, LspClient, LspError,
    Settings, TextSync,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The process-wide tool context: connection pool, document state,
/// diagnostics cache, and the resolved settings. Built once at startup
/// and passed by reference into handlers — never a singleton.
pub struct ToolContext {
    pub connections: ConnectionManager,
    pub documents: Arc<DocumentManager>,
    pub diagnostics: Arc<DiagnosticsCache>,
    pub settings: Settings,
}

impl ToolContext {
    pub fn new(settings: Settings, workspace_override: Option<PathBuf>) -> Self {
        let diagnostics = Arc::new(DiagnosticsCache::new());
        let documents = Arc::new(DocumentManager::new(diagnostics.clone()));
        let connections = ConnectionManager::new(
            settings.registry(),
            settings.manager_config(workspace_override),
            documents.clone(),
            diagnostics.clone(),
        );
        Self { connections, documents, diagnostics, settings }
    }

    /// Route a file to its client and make sure the document is open
    /// with it. The common preamble of nearly every operation.
    pub async fn client_with_document(
        &self,
        path: &Path,
    ) -> Result<(Arc<LspClient>, Url), LspError> {
        let client = self.connections.get_client_for_file(path).await?;
        let uri = self.documents.open_document(client.as_ref(), path).await?;
        Ok((client, uri))
    }

    /// Synchronized text of an open document.
    pub async fn document_text(&self, client: &LspClient, uri: &Url) -> Result<String, LspError> {
        self.documents
            .text(uri, &TextSync::client_id(client))
            .await
            .ok_or(LspError::NotReady)
    }

    /// Translate an agent 1-based position, clamping for read queries
    /// and validating for mutating ones.
    pub async fn lsp_position(
        &self,
        client: &LspClient,
        uri: &Url,
        line: u32,
        column: u32,
        strict: bool,
    ) -> Result<Position, LspError> {
        let text = self.document_text(client, uri).await?;
        if strict {
            position::to_lsp_position_strict(&text, line, column)
        } else {
            Ok(position::to_lsp_position_clamped(&text, line, column))
        }
    }

    /// Absolute-path check applied to every inbound file argument.
    pub fn require_absolute(&self, path: &str) -> Result<PathBuf, LspError> {
        let path = Path::new(path);
        if !path.is_absolute() {
            return Err(LspError::FileNotReadable(format!(
                "{} is not an absolute path",
                path.display()
            )));
        }
        Ok(uri::normalize_path(path))
    }
}
