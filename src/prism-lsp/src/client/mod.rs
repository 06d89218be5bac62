//! LSP client: drives one language server subprocess.

mod capabilities;
mod config;
mod process;
mod requests;

pub use capabilities::CachedServerCapabilities;
pub use config::{LspClientConfig, DEFAULT_REQUEST_TIMEOUT};

use crate::diagnostics::Diagnostic;
use crate::transport::Transport;
use crate::{uri, LspError, Result, ServerConfig};
use lsp_types::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, RwLock as StdRwLock};
use tokio::sync::oneshot;
use tracing::warn;

/// Observer for diagnostics pushed by the server.
pub type DiagnosticsObserver = Arc<dyn Fn(&Url, &[Diagnostic]) + Send + Sync>;

/// Observer invoked with the exit code when the subprocess ends.
pub type ExitObserver = Arc<dyn Fn(Option<i32>) + Send + Sync>;

/// One language server connection. Single-owner: only the connection
/// manager creates and disposes clients.
pub struct LspClient {
    pub(crate) config: ServerConfig,
    pub(crate) client_config: LspClientConfig,
    pub(crate) root: PathBuf,
    pub(crate) root_uri: Url,
    pub(crate) transport: OnceLock<Arc<Transport>>,
    /// Next request id; unique for the lifetime of this client.
    pub(crate) request_id: AtomicI64,
    pub(crate) initialized: Arc<AtomicBool>,
    pub(crate) alive: Arc<AtomicBool>,
    /// Set while a deliberate shutdown is in flight, so failed requests
    /// surface as cancelled rather than crashed.
    pub(crate) closing: Arc<AtomicBool>,
    pub(crate) pid: OnceLock<u32>,
    pub(crate) capabilities: OnceLock<CachedServerCapabilities>,
    pub(crate) diagnostics: Arc<StdRwLock<HashMap<Url, Vec<Diagnostic>>>>,
    pub(crate) diagnostics_observers: Arc<StdRwLock<Vec<DiagnosticsObserver>>>,
    pub(crate) exit_observers: Arc<StdRwLock<Vec<ExitObserver>>>,
    pub(crate) kill_tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl LspClient {
    pub fn new(config: ServerConfig, client_config: LspClientConfig, root: PathBuf) -> Result<Self> {
        let root_uri = uri::path_to_uri(&root)?;
        Ok(Self {
            config,
            client_config,
            root,
            root_uri,
            transport: OnceLock::new(),
            request_id: AtomicI64::new(1),
            initialized: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            pid: OnceLock::new(),
            capabilities: OnceLock::new(),
            diagnostics: Arc::new(StdRwLock::new(HashMap::new())),
            diagnostics_observers: Arc::new(StdRwLock::new(Vec::new())),
            exit_observers: Arc::new(StdRwLock::new(Vec::new())),
            kill_tx: StdMutex::new(None),
        })
    }

    /// Stable identifier for this connection, used as the document
    /// manager's client key.
    pub fn id(&self) -> String {
        format!("{}@{}", self.config.id, self.root.display())
    }

    pub fn server_id(&self) -> &str {
        &self.config.id
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Capability set cached from the initialize reply.
    pub fn capabilities(&self) -> Result<&CachedServerCapabilities> {
        self.capabilities.get().ok_or(LspError::NotReady)
    }

    pub(crate) fn require_capability(&self, name: &str, supported: bool) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(LspError::CapabilityNotSupported(name.to_string()))
        }
    }

    pub fn register_diagnostics_observer(&self, observer: DiagnosticsObserver) {
        self.diagnostics_observers.write().unwrap().push(observer);
    }

    pub fn register_exit_observer(&self, observer: ExitObserver) {
        self.exit_observers.write().unwrap().push(observer);
    }

    /// Diagnostics mirror for one document.
    pub fn diagnostics_for(&self, uri: &Url) -> Vec<Diagnostic> {
        self.diagnostics.read().unwrap().get(uri).cloned().unwrap_or_default()
    }

    fn transport(&self) -> Result<&Arc<Transport>> {
        self.transport.get().ok_or(LspError::NotReady)
    }

    /// Send a request and await its reply under the configured timeout.
    /// On timeout the request is cancelled on the server side too.
    pub async fn request<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        // Never started is "not ready"; started-then-died is "crashed".
        let transport = self.transport()?;
        if !self.is_alive() {
            return Err(LspError::ServerCrashed(format!(
                "{} is not running",
                self.config.id
            )));
        }
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let rx = transport.send_request(id, method, serde_json::to_value(params)?).await?;

        match tokio::time::timeout(self.client_config.request_timeout, rx).await {
            Ok(Ok(reply)) => {
                if let Some(error) = reply.get("error") {
                    return Err(LspError::InvalidResponse(error.to_string()));
                }
                let result = reply.get("result").cloned().unwrap_or(Value::Null);
                serde_json::from_value(result).map_err(Into::into)
            }
            Ok(Err(_)) => {
                // Reader dropped the sender: the connection is gone.
                if self.closing.load(Ordering::SeqCst) {
                    Err(LspError::RequestCancelled)
                } else {
                    Err(LspError::ServerCrashed(format!(
                        "{} closed the connection mid-request",
                        self.config.id
                    )))
                }
            }
            Err(_) => {
                transport.discard(id);
                if let Err(e) = transport
                    .send_notification("$/cancelRequest", serde_json::json!({ "id": id }))
                    .await
                {
                    warn!("failed to send $/cancelRequest for {method} (id={id}): {e}");
                }
                Err(LspError::Timeout {
                    method: method.to_string(),
                    timeout: self.client_config.request_timeout,
                })
            }
        }
    }

    /// Send a notification. Failures are the caller's to log and swallow.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let transport = self.transport()?;
        transport.send_notification(method, serde_json::to_value(params)?).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn silent_server_config() -> ServerConfig {
        // `sleep` never answers and never reads: a server that hangs.
        ServerConfig::new("silent", "Silent Server")
            .command(vec!["sleep", "30"])
            .extensions(vec!["x"])
            .language_ids(vec!["plaintext"])
    }

    #[tokio::test(start_paused = true)]
    async fn requests_time_out_against_a_hung_server() {
        let dir = tempfile::tempdir().unwrap();
        let client = LspClient::new(
            silent_server_config(),
            LspClientConfig::default().with_request_timeout(Duration::from_millis(250)),
            dir.path().to_path_buf(),
        )
        .unwrap();
        client.start().await.unwrap();

        let err = client.request::<Value, Value>("test/slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, LspError::Timeout { .. }), "got {err:?}");

        client.shutdown().await.unwrap();
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn requests_before_start_are_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let client = LspClient::new(
            silent_server_config(),
            LspClientConfig::default(),
            dir.path().to_path_buf(),
        )
        .unwrap();
        let err = client.request::<Value, Value>("test/x", Value::Null).await.unwrap_err();
        assert!(matches!(err, LspError::NotReady));
        assert!(client.capabilities().is_err());
    }
}
