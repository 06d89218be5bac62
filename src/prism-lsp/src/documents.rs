//! Document synchronization across many clients.
//!
//! State is keyed by (uri, client id) so a polyglot file can be open
//! with several servers at once. Version counters are per-uri, shared by
//! every holder, strictly increasing, and never reused for the lifetime
//! of the process — a close/reopen cycle continues the sequence rather
//! than restarting it, which is what keeps servers from ever seeing a
//! version move backwards.

use crate::diagnostics::DiagnosticsCache;
use crate::server_config::language_id_for_path;
use crate::{uri as uri_codec, LspClient, LspError, Result};
use async_trait::async_trait;
use lsp_types::Url;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// The slice of a client the document manager needs. `LspClient` is the
/// production implementation; tests substitute a recording mock.
#[async_trait]
pub trait TextSync: Send + Sync {
    fn client_id(&self) -> String;
    async fn did_open(&self, uri: &Url, language_id: &str, version: i32, text: &str) -> Result<()>;
    async fn did_change(&self, uri: &Url, version: i32, text: &str) -> Result<()>;
    async fn did_close(&self, uri: &Url) -> Result<()>;
}

#[async_trait]
impl TextSync for LspClient {
    fn client_id(&self) -> String {
        self.id()
    }

    async fn did_open(&self, uri: &Url, language_id: &str, version: i32, text: &str) -> Result<()> {
        self.did_open_document(uri, language_id, version, text).await
    }

    async fn did_change(&self, uri: &Url, version: i32, text: &str) -> Result<()> {
        self.did_change_document(uri, version, text).await
    }

    async fn did_close(&self, uri: &Url) -> Result<()> {
        self.did_close_document(uri).await
    }
}

type DocKey = (Url, String);

/// Per-(uri, client) open document.
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub uri: Url,
    pub text: String,
    pub version: i32,
    pub language_id: String,
}

/// Enforces the LSP synchronization contract for the whole process.
pub struct DocumentManager {
    diagnostics: Arc<DiagnosticsCache>,
    /// Per-uri version counters; live for the process lifetime.
    versions: Mutex<HashMap<Url, i32>>,
    docs: Mutex<HashMap<DocKey, DocumentState>>,
    /// Single-flight locks serializing opens per (uri, client).
    open_locks: Mutex<HashMap<DocKey, Arc<Mutex<()>>>>,
}

impl DocumentManager {
    pub fn new(diagnostics: Arc<DiagnosticsCache>) -> Self {
        Self {
            diagnostics,
            versions: Mutex::new(HashMap::new()),
            docs: Mutex::new(HashMap::new()),
            open_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn open_lock(&self, key: &DocKey) -> Arc<Mutex<()>> {
        self.open_locks.lock().await.entry(key.clone()).or_default().clone()
    }

    async fn next_version(&self, uri: &Url) -> i32 {
        let mut versions = self.versions.lock().await;
        let counter = versions.entry(uri.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Undo a version allocation after a failed send, provided nobody
    /// else has advanced the counter since.
    async fn rollback_version(&self, uri: &Url, allocated: i32) {
        let mut versions = self.versions.lock().await;
        if let Some(counter) = versions.get_mut(uri) {
            if *counter == allocated {
                *counter -= 1;
            }
        }
    }

    /// Ensure the document is open with `client`. Idempotent; concurrent
    /// callers for the same key coalesce into a single `didOpen`.
    pub async fn open_document(&self, client: &dyn TextSync, path: &Path) -> Result<Url> {
        let uri = uri_codec::path_to_uri(path)?;
        let key = (uri.clone(), client.client_id());

        if self.docs.lock().await.contains_key(&key) {
            return Ok(uri);
        }

        let lock = self.open_lock(&key).await;
        let _guard = lock.lock().await;

        // A concurrent open may have won while we waited on the lock.
        if self.docs.lock().await.contains_key(&key) {
            return Ok(uri);
        }

        let text = uri_codec::read_document(path).await?;
        let language_id = language_id_for_path(path);
        let version = self.next_version(&uri).await;

        if let Err(e) = client.did_open(&uri, language_id, version, &text).await {
            // Roll back so the next attempt starts clean.
            self.rollback_version(&uri, version).await;
            warn!(uri = %uri, "didOpen failed, rolling back: {e}");
            return Err(e);
        }

        self.docs.lock().await.insert(
            key,
            DocumentState {
                uri: uri.clone(),
                text,
                version,
                language_id: language_id.to_string(),
            },
        );
        debug!(uri = %uri, version, "document opened");
        Ok(uri)
    }

    /// Replace the document content and notify the holding client. Opens
    /// the document first when needed; callers feeding unsaved text open
    /// then update.
    pub async fn update_content(&self, client: &dyn TextSync, path: &Path, text: &str) -> Result<Url> {
        let uri = self.open_document(client, path).await?;
        let key = (uri.clone(), client.client_id());

        let lock = self.open_lock(&key).await;
        let _guard = lock.lock().await;

        let version = self.next_version(&uri).await;
        if let Err(e) = client.did_change(&uri, version, text).await {
            self.rollback_version(&uri, version).await;
            return Err(e);
        }

        let mut docs = self.docs.lock().await;
        match docs.get_mut(&key) {
            Some(state) => {
                state.text = text.to_string();
                state.version = version;
            }
            None => return Err(LspError::InvalidResponse("document vanished during update".into())),
        }
        Ok(uri)
    }

    /// Close the document for `client`. The last holder out also drops
    /// the cached diagnostics for the uri. Transport errors on the
    /// notification are logged and swallowed — there is nobody to
    /// receive them.
    pub async fn close_document(&self, client: &dyn TextSync, path: &Path) -> Result<()> {
        let uri = uri_codec::path_to_uri(path)?;
        let key = (uri.clone(), client.client_id());

        let removed = self.docs.lock().await.remove(&key).is_some();
        if !removed {
            return Ok(());
        }

        if let Err(e) = client.did_close(&uri).await {
            warn!(uri = %uri, "didClose failed: {e}");
        }

        if !self.has_holders(&uri).await {
            self.diagnostics.clear_uri(&uri);
        }
        Ok(())
    }

    /// Drop every document held by a disposed client without notifying
    /// it (the process is gone). Diagnostics for uris nobody else holds
    /// are cleared.
    pub async fn drop_client(&self, client_id: &str) {
        let dropped: Vec<Url> = {
            let mut docs = self.docs.lock().await;
            let keys: Vec<DocKey> =
                docs.keys().filter(|(_, id)| id == client_id).cloned().collect();
            keys.iter().filter_map(|key| docs.remove(key)).map(|state| state.uri).collect()
        };
        for uri in dropped {
            if !self.has_holders(&uri).await {
                self.diagnostics.clear_uri(&uri);
            }
        }
    }

    pub async fn is_open(&self, uri: &Url, client_id: &str) -> bool {
        self.docs.lock().await.contains_key(&(uri.clone(), client_id.to_string()))
    }

    /// Current text for a document, as last synchronized.
    pub async fn text(&self, uri: &Url, client_id: &str) -> Option<String> {
        self.docs
            .lock()
            .await
            .get(&(uri.clone(), client_id.to_string()))
            .map(|state| state.text.clone())
    }

    async fn has_holders(&self, uri: &Url) -> bool {
        self.docs.lock().await.keys().any(|(u, _)| u == uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    /// Records every notification the manager emits.
    struct RecordingClient {
        id: String,
        log: StdMutex<Vec<(String, i32)>>,
        fail_next_open: StdMutex<bool>,
    }

    impl RecordingClient {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                log: StdMutex::new(Vec::new()),
                fail_next_open: StdMutex::new(false),
            })
        }

        fn log(&self) -> Vec<(String, i32)> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextSync for RecordingClient {
        fn client_id(&self) -> String {
            self.id.clone()
        }

        async fn did_open(&self, _uri: &Url, _language_id: &str, version: i32, _text: &str) -> Result<()> {
            if std::mem::take(&mut *self.fail_next_open.lock().unwrap()) {
                return Err(LspError::ServerCrashed("boom".into()));
            }
            self.log.lock().unwrap().push(("open".into(), version));
            Ok(())
        }

        async fn did_change(&self, _uri: &Url, version: i32, _text: &str) -> Result<()> {
            self.log.lock().unwrap().push(("change".into(), version));
            Ok(())
        }

        async fn did_close(&self, _uri: &Url) -> Result<()> {
            self.log.lock().unwrap().push(("close".into(), 0));
            Ok(())
        }
    }

    fn manager() -> DocumentManager {
        DocumentManager::new(Arc::new(DiagnosticsCache::new()))
    }

    #[tokio::test]
    async fn versions_survive_close_and_reopen() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ts");
        fs::write(&file, "let x = 1;").unwrap();

        let docs = manager();
        let client = RecordingClient::new("typescript@proj");

        docs.open_document(client.as_ref(), &file).await.unwrap();
        docs.update_content(client.as_ref(), &file, "let x = 2;").await.unwrap();
        docs.update_content(client.as_ref(), &file, "let x = 3;").await.unwrap();
        docs.close_document(client.as_ref(), &file).await.unwrap();
        docs.open_document(client.as_ref(), &file).await.unwrap();

        assert_eq!(
            client.log(),
            vec![
                ("open".to_string(), 1),
                ("change".to_string(), 2),
                ("change".to_string(), 3),
                ("close".to_string(), 0),
                ("open".to_string(), 4),
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_opens_send_one_did_open() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("b.ts");
        fs::write(&file, "export {}").unwrap();

        let docs = Arc::new(manager());
        let client = RecordingClient::new("typescript@proj");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let docs = docs.clone();
            let client = client.clone();
            let file = file.clone();
            handles.push(tokio::spawn(async move {
                docs.open_document(client.as_ref(), &file).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let opens = client.log().iter().filter(|(kind, _)| kind == "open").count();
        assert_eq!(opens, 1);
    }

    #[tokio::test]
    async fn version_counter_is_shared_across_clients() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("poly.ts");
        fs::write(&file, "x").unwrap();

        let docs = manager();
        let first = RecordingClient::new("typescript@proj");
        let second = RecordingClient::new("eslint@proj");

        docs.open_document(first.as_ref(), &file).await.unwrap();
        docs.open_document(second.as_ref(), &file).await.unwrap();

        assert_eq!(first.log(), vec![("open".to_string(), 1)]);
        assert_eq!(second.log(), vec![("open".to_string(), 2)]);
    }

    #[tokio::test]
    async fn failed_open_rolls_back_for_clean_retry() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("c.rs");
        fs::write(&file, "fn f() {}").unwrap();

        let docs = manager();
        let client = RecordingClient::new("rust@proj");
        *client.fail_next_open.lock().unwrap() = true;

        assert!(docs.open_document(client.as_ref(), &file).await.is_err());
        let uri = uri_codec::path_to_uri(&file).unwrap();
        assert!(!docs.is_open(&uri, &client.client_id()).await);

        // Retry starts the sequence at version 1 as if nothing happened.
        docs.open_document(client.as_ref(), &file).await.unwrap();
        assert_eq!(client.log(), vec![("open".to_string(), 1)]);
    }

    #[tokio::test]
    async fn last_close_clears_cached_diagnostics() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("d.py");
        fs::write(&file, "x = 1").unwrap();

        let cache = Arc::new(DiagnosticsCache::new());
        let docs = DocumentManager::new(cache.clone());
        let first = RecordingClient::new("python@proj");
        let second = RecordingClient::new("ruff@proj");

        let uri = docs.open_document(first.as_ref(), &file).await.unwrap();
        docs.open_document(second.as_ref(), &file).await.unwrap();

        cache.update(
            uri.clone(),
            vec![crate::diagnostics::Diagnostic {
                line: 1,
                column: 1,
                end_line: 1,
                end_column: 2,
                severity: crate::diagnostics::DiagnosticSeverity::Error,
                message: "bad".into(),
                code: None,
                source: None,
                related: Vec::new(),
            }],
        );

        docs.close_document(first.as_ref(), &file).await.unwrap();
        // One holder remains: diagnostics stay.
        assert_eq!(cache.get(&uri).len(), 1);

        docs.close_document(second.as_ref(), &file).await.unwrap();
        assert!(cache.get(&uri).is_empty());
    }

    #[tokio::test]
    async fn update_opens_from_disk_first() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("e.go");
        fs::write(&file, "package main").unwrap();

        let docs = manager();
        let client = RecordingClient::new("go@proj");

        let uri = docs.update_content(client.as_ref(), &file, "package main // edited").await.unwrap();
        assert_eq!(
            client.log(),
            vec![("open".to_string(), 1), ("change".to_string(), 2)]
        );
        assert_eq!(
            docs.text(&uri, &client.client_id()).await.as_deref(),
            Some("package main // edited")
        );
    }
}
