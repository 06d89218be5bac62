//! Typed language feature requests. Every method checks the matching
//! server capability before going on the wire.

use crate::Result;
use lsp_types::request::{
    GotoImplementationParams, GotoImplementationResponse, GotoTypeDefinitionParams,
    GotoTypeDefinitionResponse,
};
use lsp_types::*;

use super::LspClient;

impl LspClient {
    pub async fn did_open_document(
        &self,
        uri: &Url,
        language_id: &str,
        version: i32,
        text: &str,
    ) -> Result<()> {
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: language_id.to_string(),
                version,
                text: text.to_string(),
            },
        };
        self.notify("textDocument/didOpen", params).await
    }

    pub async fn did_change_document(&self, uri: &Url, version: i32, text: &str) -> Result<()> {
        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier { uri: uri.clone(), version },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.to_string(),
            }],
        };
        self.notify("textDocument/didChange", params).await
    }

    pub async fn did_close_document(&self, uri: &Url) -> Result<()> {
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
        };
        self.notify("textDocument/didClose", params).await
    }

    pub async fn hover(&self, uri: &Url, position: Position) -> Result<Option<Hover>> {
        self.require_capability("hover", self.capabilities()?.hover)?;
        let params = HoverParams {
            text_document_position_params: text_position(uri, position),
            work_done_progress_params: Default::default(),
        };
        self.request("textDocument/hover", params).await
    }

    pub async fn goto_definition(
        &self,
        uri: &Url,
        position: Position,
    ) -> Result<Option<GotoDefinitionResponse>> {
        self.require_capability("definition", self.capabilities()?.definition)?;
        let params = GotoDefinitionParams {
            text_document_position_params: text_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("textDocument/definition", params).await
    }

    pub async fn goto_type_definition(
        &self,
        uri: &Url,
        position: Position,
    ) -> Result<Option<GotoTypeDefinitionResponse>> {
        self.require_capability("typeDefinition", self.capabilities()?.type_definition)?;
        let params = GotoTypeDefinitionParams {
            text_document_position_params: text_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("textDocument/typeDefinition", params).await
    }

    pub async fn find_references(
        &self,
        uri: &Url,
        position: Position,
        include_declaration: bool,
    ) -> Result<Option<Vec<Location>>> {
        self.require_capability("references", self.capabilities()?.references)?;
        let params = ReferenceParams {
            text_document_position: text_position(uri, position),
            context: ReferenceContext { include_declaration },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("textDocument/references", params).await
    }

    pub async fn goto_implementation(
        &self,
        uri: &Url,
        position: Position,
    ) -> Result<Option<GotoImplementationResponse>> {
        self.require_capability("implementation", self.capabilities()?.implementation)?;
        let params = GotoImplementationParams {
            text_document_position_params: text_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("textDocument/implementation", params).await
    }

    pub async fn document_symbols(&self, uri: &Url) -> Result<Option<DocumentSymbolResponse>> {
        self.require_capability("documentSymbol", self.capabilities()?.document_symbol)?;
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("textDocument/documentSymbol", params).await
    }

    pub async fn workspace_symbols(&self, query: &str) -> Result<Option<WorkspaceSymbolResponse>> {
        self.require_capability("workspaceSymbol", self.capabilities()?.workspace_symbol)?;
        let params = WorkspaceSymbolParams {
            query: query.to_string(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("workspace/symbol", params).await
    }

    pub async fn completion(&self, uri: &Url, position: Position) -> Result<Option<CompletionResponse>> {
        self.require_capability("completion", self.capabilities()?.completion)?;
        let params = CompletionParams {
            text_document_position: text_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: None,
        };
        self.request("textDocument/completion", params).await
    }

    pub async fn signature_help(&self, uri: &Url, position: Position) -> Result<Option<SignatureHelp>> {
        self.require_capability("signatureHelp", self.capabilities()?.signature_help)?;
        let params = SignatureHelpParams {
            text_document_position_params: text_position(uri, position),
            work_done_progress_params: Default::default(),
            context: None,
        };
        self.request("textDocument/signatureHelp", params).await
    }

    /// prepareRename is optional: a server advertising rename without
    /// prepare gets a null result so callers proceed straight to rename.
    pub async fn prepare_rename(
        &self,
        uri: &Url,
        position: Position,
    ) -> Result<Option<PrepareRenameResponse>> {
        let caps = self.capabilities()?;
        self.require_capability("rename", caps.rename)?;
        if !caps.prepare_rename {
            return Ok(None);
        }
        let params = TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            position,
        };
        self.request("textDocument/prepareRename", params).await
    }

    pub async fn rename(
        &self,
        uri: &Url,
        position: Position,
        new_name: &str,
    ) -> Result<Option<WorkspaceEdit>> {
        self.require_capability("rename", self.capabilities()?.rename)?;
        let params = RenameParams {
            text_document_position: text_position(uri, position),
            new_name: new_name.to_string(),
            work_done_progress_params: Default::default(),
        };
        self.request("textDocument/rename", params).await
    }

    pub async fn format_document(
        &self,
        uri: &Url,
        options: FormattingOptions,
    ) -> Result<Option<Vec<TextEdit>>> {
        self.require_capability("formatting", self.capabilities()?.formatting)?;
        let params = DocumentFormattingParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            options,
            work_done_progress_params: Default::default(),
        };
        self.request("textDocument/formatting", params).await
    }

    pub async fn code_actions(
        &self,
        uri: &Url,
        range: Range,
        only: Option<Vec<CodeActionKind>>,
    ) -> Result<Option<CodeActionResponse>> {
        self.require_capability("codeAction", self.capabilities()?.code_action)?;
        let params = CodeActionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            range,
            context: CodeActionContext { diagnostics: Vec::new(), only, trigger_kind: None },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("textDocument/codeAction", params).await
    }

    pub async fn prepare_call_hierarchy(
        &self,
        uri: &Url,
        position: Position,
    ) -> Result<Option<Vec<CallHierarchyItem>>> {
        self.require_capability("callHierarchy", self.capabilities()?.call_hierarchy)?;
        let params = CallHierarchyPrepareParams {
            text_document_position_params: text_position(uri, position),
            work_done_progress_params: Default::default(),
        };
        self.request("textDocument/prepareCallHierarchy", params).await
    }

    pub async fn incoming_calls(
        &self,
        item: &CallHierarchyItem,
    ) -> Result<Option<Vec<CallHierarchyIncomingCall>>> {
        let params = CallHierarchyIncomingCallsParams {
            item: item.clone(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("callHierarchy/incomingCalls", params).await
    }

    pub async fn outgoing_calls(
        &self,
        item: &CallHierarchyItem,
    ) -> Result<Option<Vec<CallHierarchyOutgoingCall>>> {
        let params = CallHierarchyOutgoingCallsParams {
            item: item.clone(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("callHierarchy/outgoingCalls", params).await
    }

    pub async fn prepare_type_hierarchy(
        &self,
        uri: &Url,
        position: Position,
    ) -> Result<Option<Vec<TypeHierarchyItem>>> {
        self.require_capability("typeHierarchy", self.capabilities()?.type_hierarchy)?;
        let params = TypeHierarchyPrepareParams {
            text_document_position_params: text_position(uri, position),
            work_done_progress_params: Default::default(),
        };
        self.request("textDocument/prepareTypeHierarchy", params).await
    }

    pub async fn supertypes(&self, item: &TypeHierarchyItem) -> Result<Option<Vec<TypeHierarchyItem>>> {
        let params = TypeHierarchySupertypesParams {
            item: item.clone(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("typeHierarchy/supertypes", params).await
    }

    pub async fn subtypes(&self, item: &TypeHierarchyItem) -> Result<Option<Vec<TypeHierarchyItem>>> {
        let params = TypeHierarchySubtypesParams {
            item: item.clone(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("typeHierarchy/subtypes", params).await
    }
}

fn text_position(uri: &Url, position: Position) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position,
    }
}
