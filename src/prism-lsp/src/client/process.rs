//! Subprocess lifecycle: spawn, initialize handshake, shutdown.

use crate::diagnostics::Diagnostic;
use crate::transport::Transport;
use crate::{LspError, Result};
use lsp_types::*;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::LspClient;

impl LspClient {
    /// Spawn the server process, wire the transport and start its reader.
    pub async fn start(&self) -> Result<()> {
        if self.config.command.is_empty() {
            return Err(LspError::StartFailed(format!(
                "no command configured for {}",
                self.config.id
            )));
        }

        let mut cmd = Command::new(&self.config.command[0]);
        if self.config.command.len() > 1 {
            cmd.args(&self.config.command[1..]);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            LspError::StartFailed(format!("failed to spawn {}: {e}", self.config.command[0]))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::StartFailed("failed to open server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::StartFailed("failed to open server stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LspError::StartFailed("failed to open server stderr".into()))?;

        if let Some(pid) = child.id() {
            let _ = self.pid.set(pid);
        }

        // Drain stderr so the server can never block on it.
        let stderr_name = self.config.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %stderr_name, "stderr: {line}");
            }
        });

        let transport = Transport::spawn(stdin, stdout);

        // publishDiagnostics feeds the local mirror and any observers.
        let mirror = self.diagnostics.clone();
        let observers = self.diagnostics_observers.clone();
        transport.register_notification_handler(
            "textDocument/publishDiagnostics",
            Arc::new(move |_method, params| {
                let parsed: PublishDiagnosticsParams = match serde_json::from_value(params) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("malformed publishDiagnostics: {e}");
                        return;
                    }
                };
                let converted: Vec<Diagnostic> =
                    parsed.diagnostics.iter().map(Diagnostic::from_lsp).collect();
                mirror.write().unwrap().insert(parsed.uri.clone(), converted.clone());
                for observer in observers.read().unwrap().iter() {
                    observer(&parsed.uri, &converted);
                }
            }),
        );

        let catch_all_name = self.config.id.clone();
        transport.register_catch_all(Arc::new(move |method, _params| {
            debug!(server = %catch_all_name, method, "ignoring notification");
        }));

        let alive_on_close = self.alive.clone();
        let initialized_on_close = self.initialized.clone();
        transport.on_close(Box::new(move || {
            alive_on_close.store(false, Ordering::SeqCst);
            initialized_on_close.store(false, Ordering::SeqCst);
        }));

        self.transport
            .set(transport)
            .map_err(|_| LspError::StartFailed(format!("{} was already started", self.config.id)))?;
        self.alive.store(true, Ordering::SeqCst);

        // The monitor owns the child: it reaps the exit status and honors
        // kill requests from shutdown.
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        *self.kill_tx.lock().unwrap() = Some(kill_tx);

        let alive = self.alive.clone();
        let initialized = self.initialized.clone();
        let exit_observers = self.exit_observers.clone();
        let server_id = self.config.id.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                _ = &mut kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await.ok().and_then(|s| s.code())
                }
            };
            alive.store(false, Ordering::SeqCst);
            initialized.store(false, Ordering::SeqCst);
            debug!(server = %server_id, ?code, "server process exited");
            for observer in exit_observers.read().unwrap().iter() {
                observer(code);
            }
        });

        info!(server = %self.config.id, root = %self.root.display(), "started language server");
        Ok(())
    }

    /// Run the initialize handshake. Any failure tears the process down
    /// and surfaces as a start failure.
    pub async fn initialize(&self) -> Result<()> {
        match self.initialize_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.force_kill().await;
                Err(LspError::StartFailed(format!(
                    "initialize failed for {}: {e}",
                    self.config.id
                )))
            }
        }
    }

    #[allow(deprecated)] // root_uri is deprecated in LSP but servers still want it
    async fn initialize_inner(&self) -> Result<()> {
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(self.root_uri.clone()),
            capabilities: Self::client_capabilities(),
            initialization_options: if self.config.init_options.is_null() {
                None
            } else {
                Some(self.config.init_options.clone())
            },
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: self.root_uri.clone(),
                name: self
                    .root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "workspace".to_string()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self.request("initialize", params).await?;

        let _ = self
            .capabilities
            .set(super::CachedServerCapabilities::from_initialize_result(&result));

        self.notify("initialized", InitializedParams {}).await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!(server = %self.config.id, "language server initialized");
        Ok(())
    }

    /// The static capability descriptor announced to every server.
    fn client_capabilities() -> ClientCapabilities {
        ClientCapabilities {
            workspace: Some(WorkspaceClientCapabilities {
                workspace_folders: Some(true),
                symbol: Some(WorkspaceSymbolClientCapabilities {
                    dynamic_registration: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(TextDocumentSyncClientCapabilities {
                    dynamic_registration: Some(false),
                    will_save: Some(false),
                    will_save_wait_until: Some(false),
                    did_save: Some(true),
                }),
                definition: Some(GotoCapability {
                    dynamic_registration: Some(false),
                    link_support: Some(true),
                }),
                type_definition: Some(GotoCapability {
                    dynamic_registration: Some(false),
                    link_support: Some(true),
                }),
                references: Some(ReferenceClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                implementation: Some(GotoCapability {
                    dynamic_registration: Some(false),
                    link_support: Some(true),
                }),
                hover: Some(HoverClientCapabilities {
                    dynamic_registration: Some(false),
                    content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                }),
                signature_help: Some(SignatureHelpClientCapabilities {
                    dynamic_registration: Some(false),
                    signature_information: Some(SignatureInformationSettings {
                        documentation_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                        parameter_information: None,
                        active_parameter_support: None,
                    }),
                    context_support: None,
                }),
                document_symbol: Some(DocumentSymbolClientCapabilities {
                    dynamic_registration: Some(false),
                    hierarchical_document_symbol_support: Some(true),
                    ..Default::default()
                }),
                completion: Some(CompletionClientCapabilities {
                    dynamic_registration: Some(false),
                    completion_item: Some(CompletionItemCapability {
                        snippet_support: Some(true),
                        documentation_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                rename: Some(RenameClientCapabilities {
                    dynamic_registration: Some(false),
                    prepare_support: Some(true),
                    ..Default::default()
                }),
                publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                    related_information: Some(true),
                    ..Default::default()
                }),
                call_hierarchy: Some(CallHierarchyClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                type_hierarchy: Some(TypeHierarchyClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                code_action: Some(CodeActionClientCapabilities {
                    dynamic_registration: Some(false),
                    ..Default::default()
                }),
                formatting: Some(DocumentFormattingClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Graceful shutdown: `shutdown` request, `exit` notification, then
    /// close streams and force-kill if the server lingers.
    pub async fn shutdown(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);

        if self.is_alive() {
            match self.request::<Value, Option<Value>>("shutdown", Value::Null).await {
                Ok(_) => {
                    if let Err(e) = self.notify("exit", Value::Null).await {
                        debug!("exit notification failed: {e}");
                    }
                }
                Err(e) => warn!(server = %self.config.id, "shutdown request failed: {e}"),
            }
        }

        if let Some(transport) = self.transport.get() {
            transport.close().await;
        }
        self.force_kill().await;

        self.initialized.store(false, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        info!(server = %self.config.id, "language server shut down");
        Ok(())
    }

    pub(super) async fn force_kill(&self) {
        let kill_tx = self.kill_tx.lock().unwrap().take();
        if let Some(tx) = kill_tx {
            let _ = tx.send(());
        }
    }
}
