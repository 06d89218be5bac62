//! Connection manager: owns the pool of LSP clients.
//!
//! Clients are keyed by (server id, normalized workspace root). Starts
//! are single-flight per key, restarts are budgeted over a sliding
//! window with doubling backoff, and idle clients are evicted by a
//! janitor task. Exit observers hold only the key and a weak handle to
//! the pool, so a client can never keep the manager alive.

use crate::client::{LspClient, LspClientConfig};
use crate::diagnostics::DiagnosticsCache;
use crate::documents::DocumentManager;
use crate::root::resolve_workspace_root;
use crate::server_config::{ServerConfig, ServerRegistry};
use crate::{uri, LspError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sliding window over restart timestamps.
pub const RESTART_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Spawns permitted within the window before the key is declared dead.
pub const MAX_RESTARTS: usize = 3;
/// First backoff; doubles with each timestamp already in the window.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Default idle eviction timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Identity of one pooled client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerKey {
    pub server_id: String,
    pub root: PathBuf,
}

impl ServerKey {
    pub fn new(server_id: impl Into<String>, root: PathBuf) -> Self {
        Self { server_id: server_id.into(), root }
    }
}

impl std::fmt::Display for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.server_id, self.root.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

struct Instance {
    status: InstanceStatus,
    client: Option<Arc<LspClient>>,
    pid: Option<u32>,
    started_at: Option<Instant>,
    restart_count: u32,
    last_error: Option<String>,
    last_used: Instant,
}

impl Instance {
    fn starting() -> Self {
        Self {
            status: InstanceStatus::Starting,
            client: None,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_error: None,
            last_used: Instant::now(),
        }
    }
}

/// Point-in-time view of one instance, shaped for the status tool.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub server_id: String,
    pub root: PathBuf,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Default)]
struct RestartHistory {
    attempts: Vec<Instant>,
}

impl RestartHistory {
    fn prune(&mut self) {
        if let Some(cutoff) = Instant::now().checked_sub(RESTART_WINDOW) {
            self.attempts.retain(|t| *t >= cutoff);
        }
    }

    fn record(&mut self) {
        self.attempts.push(Instant::now());
    }

    /// A spawn is permitted while fewer than [`MAX_RESTARTS`] timestamps
    /// sit inside the window.
    fn allows_spawn(&self) -> bool {
        self.attempts.len() < MAX_RESTARTS
    }

    /// `base * 2^(n-1)` where n is the number of timestamps in the window.
    fn backoff_delay(&self) -> Duration {
        let n = self.attempts.len().max(1).min(6) as u32;
        BACKOFF_BASE * (1 << (n - 1))
    }
}

/// Manager tunables resolved from settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub client_config: LspClientConfig,
    pub idle_timeout: Duration,
    /// When false, tool calls never implicitly spawn servers; only the
    /// explicit start operation does.
    pub auto_start: bool,
    /// CLI/settings override for workspace root resolution.
    pub workspace_override: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            client_config: LspClientConfig::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            auto_start: true,
            workspace_override: None,
        }
    }
}

struct ManagerInner {
    registry: ServerRegistry,
    config: ManagerConfig,
    documents: Arc<DocumentManager>,
    diagnostics: Arc<DiagnosticsCache>,
    instances: Mutex<HashMap<ServerKey, Instance>>,
    restart_history: Mutex<HashMap<ServerKey, RestartHistory>>,
    start_locks: Mutex<HashMap<ServerKey, Arc<Mutex<()>>>>,
}

/// Pool of LSP clients keyed by (server id, workspace root).
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        registry: ServerRegistry,
        config: ManagerConfig,
        documents: Arc<DocumentManager>,
        diagnostics: Arc<DiagnosticsCache>,
    ) -> Self {
        let sweep = (config.idle_timeout.min(Duration::from_secs(60)) / 2).max(Duration::from_secs(1));
        let inner = Arc::new(ManagerInner {
            registry,
            config,
            documents,
            diagnostics,
            instances: Mutex::new(HashMap::new()),
            restart_history: Mutex::new(HashMap::new()),
            start_locks: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.evict_idle().await;
            }
        });

        Self { inner }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.inner.registry
    }

    /// Resolve `path` to its language server, starting one if needed.
    pub async fn get_client_for_file(&self, path: &Path) -> Result<Arc<LspClient>> {
        let normalized = uri::normalize_path(path);
        let ext = normalized.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = self
            .inner
            .registry
            .config_for_extension(ext)
            .ok_or_else(|| {
                let shown = if ext.is_empty() {
                    normalized.display().to_string()
                } else {
                    format!(".{ext}")
                };
                LspError::UnsupportedLanguage(shown)
            })?
            .clone();

        let root = resolve_workspace_root(
            &normalized,
            Some(&config.root_markers),
            self.inner.config.workspace_override.as_deref(),
        );
        let key = ServerKey::new(&config.id, root);
        self.inner.obtain(&key, &config, self.inner.config.auto_start).await
    }

    /// Get or start the client for an explicit (server id, root) pair.
    pub async fn get_client(&self, server_id: &str, root: &Path) -> Result<Arc<LspClient>> {
        let config = self
            .inner
            .registry
            .config_by_id(server_id)
            .ok_or_else(|| LspError::ServerNotFound(server_id.to_string()))?
            .clone();
        let key = ServerKey::new(server_id, uri::normalize_path(root));
        self.inner.obtain(&key, &config, self.inner.config.auto_start).await
    }

    /// Explicit start, bypassing the autoStart setting.
    pub async fn start_server(&self, server_id: &str, root: Option<&Path>) -> Result<Arc<LspClient>> {
        let config = self
            .inner
            .registry
            .config_by_id(server_id)
            .ok_or_else(|| LspError::ServerNotFound(server_id.to_string()))?
            .clone();
        let root = match root {
            Some(root) => uri::normalize_path(root),
            None => match &self.inner.config.workspace_override {
                Some(root) => root.clone(),
                None => std::env::current_dir()?,
            },
        };
        let key = ServerKey::new(server_id, root);
        self.inner.obtain(&key, &config, true).await
    }

    /// Stop one instance gracefully.
    pub async fn stop(&self, server_id: &str, root: &Path) -> Result<()> {
        let key = ServerKey::new(server_id, uri::normalize_path(root));
        self.inner.stop_instance(&key).await
    }

    /// Stop every instance of a server id, whatever its root.
    pub async fn stop_by_id(&self, server_id: &str) -> usize {
        let keys: Vec<ServerKey> = {
            let instances = self.inner.instances.lock().await;
            instances.keys().filter(|k| k.server_id == server_id).cloned().collect()
        };
        let mut stopped = 0;
        for key in keys {
            if self.inner.stop_instance(&key).await.is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    /// Graceful shutdown of the whole pool. Instances stop in parallel;
    /// one failure never blocks its siblings.
    pub async fn stop_all(&self) {
        let keys: Vec<ServerKey> =
            { self.inner.instances.lock().await.keys().cloned().collect() };
        let stops = keys.iter().map(|key| async move {
            if let Err(e) = self.inner.stop_instance(key).await {
                warn!(key = %key, "failed to stop instance: {e}");
            }
        });
        futures::future::join_all(stops).await;
    }

    /// Snapshot of every pooled instance.
    pub async fn list(&self) -> Vec<InstanceSnapshot> {
        let instances = self.inner.instances.lock().await;
        instances
            .iter()
            .map(|(key, instance)| InstanceSnapshot {
                server_id: key.server_id.clone(),
                root: key.root.clone(),
                status: instance.status,
                pid: instance.pid,
                uptime_secs: instance.started_at.map(|t| t.elapsed().as_secs()),
                restart_count: instance.restart_count,
                last_error: instance.last_error.clone(),
            })
            .collect()
    }

    /// Every client currently running, for fan-out queries.
    pub async fn running_clients(&self) -> Vec<Arc<LspClient>> {
        let instances = self.inner.instances.lock().await;
        instances
            .values()
            .filter(|i| i.status == InstanceStatus::Running)
            .filter_map(|i| i.client.clone())
            .collect()
    }
}

impl ManagerInner {
    async fn start_lock(&self, key: &ServerKey) -> Arc<Mutex<()>> {
        self.start_locks.lock().await.entry(key.clone()).or_default().clone()
    }

    async fn running_client(&self, key: &ServerKey) -> Option<Arc<LspClient>> {
        let mut instances = self.instances.lock().await;
        let instance = instances.get_mut(key)?;
        if instance.status != InstanceStatus::Running {
            return None;
        }
        let client = instance.client.clone()?;
        if client.is_alive() {
            instance.last_used = Instant::now();
            Some(client)
        } else {
            None
        }
    }

    /// Single-flight get-or-start for one key.
    async fn obtain(
        self: &Arc<Self>,
        key: &ServerKey,
        config: &ServerConfig,
        allow_start: bool,
    ) -> Result<Arc<LspClient>> {
        if let Some(client) = self.running_client(key).await {
            return Ok(client);
        }

        let lock = self.start_lock(key).await;
        let _guard = lock.lock().await;

        // A concurrent caller may have finished the start while we waited.
        if let Some(client) = self.running_client(key).await {
            return Ok(client);
        }

        // Fail fast, without spawning, once the window is exhausted.
        {
            let mut history = self.restart_history.lock().await;
            let entry = history.entry(key.clone()).or_default();
            entry.prune();
            if !entry.allows_spawn() {
                return Err(LspError::StartFailed(format!(
                    "{key}: {MAX_RESTARTS} failed starts within the last {}s",
                    RESTART_WINDOW.as_secs()
                )));
            }
        }

        if !allow_start {
            return Err(LspError::NotReady);
        }

        self.start_instance(key, config).await
    }

    /// Spawn-and-initialize with the in-window retry loop. Callers must
    /// hold the key's start lock.
    async fn start_instance(self: &Arc<Self>, key: &ServerKey, config: &ServerConfig) -> Result<Arc<LspClient>> {
        self.instances.lock().await.entry(key.clone()).or_insert_with(Instance::starting).status =
            InstanceStatus::Starting;

        loop {
            match self.spawn_and_init(key, config).await {
                Ok(client) => {
                    let restart_count = {
                        let history = self.restart_history.lock().await;
                        history.get(key).map(|h| h.attempts.len() as u32).unwrap_or(0)
                    };
                    {
                        let mut instances = self.instances.lock().await;
                        let instance =
                            instances.entry(key.clone()).or_insert_with(Instance::starting);
                        instance.status = InstanceStatus::Running;
                        instance.client = Some(client.clone());
                        instance.pid = client.pid();
                        instance.started_at = Some(Instant::now());
                        instance.last_used = Instant::now();
                        instance.restart_count = restart_count;
                        instance.last_error = None;
                    }
                    self.wire_observers(key, &client);
                    info!(key = %key, pid = ?client.pid(), "language server running");
                    return Ok(client);
                }
                Err(e) => {
                    let retry_after = {
                        let mut history = self.restart_history.lock().await;
                        let entry = history.entry(key.clone()).or_default();
                        entry.prune();
                        entry.record();
                        if entry.allows_spawn() {
                            Some(entry.backoff_delay())
                        } else {
                            None
                        }
                    };
                    {
                        let mut instances = self.instances.lock().await;
                        if let Some(instance) = instances.get_mut(key) {
                            instance.status = InstanceStatus::Crashed;
                            instance.last_error = Some(e.to_string());
                            instance.client = None;
                        }
                    }
                    match retry_after {
                        Some(delay) => {
                            debug!(key = %key, ?delay, "start failed, backing off: {e}");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            warn!(key = %key, "start failed, budget exhausted: {e}");
                            self.instances.lock().await.remove(key);
                            return Err(match e {
                                LspError::StartFailed(_) => e,
                                other => LspError::StartFailed(other.to_string()),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn spawn_and_init(&self, key: &ServerKey, config: &ServerConfig) -> Result<Arc<LspClient>> {
        let client = Arc::new(LspClient::new(
            config.clone(),
            self.config.client_config.clone(),
            key.root.clone(),
        )?);
        client.start().await?;
        client.initialize().await?;
        Ok(client)
    }

    /// Attach pool-side observers. The exit observer captures only the
    /// key and a weak handle, never the client itself.
    fn wire_observers(self: &Arc<Self>, key: &ServerKey, client: &Arc<LspClient>) {
        let cache = self.diagnostics.clone();
        client.register_diagnostics_observer(Arc::new(move |uri, diagnostics| {
            cache.update(uri.clone(), diagnostics.to_vec());
        }));

        let weak = Arc::downgrade(self);
        let key = key.clone();
        let client_id = client.id();
        client.register_exit_observer(Arc::new(move |code| {
            let weak: Weak<ManagerInner> = weak.clone();
            let key = key.clone();
            let client_id = client_id.clone();
            tokio::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_exit(key, client_id, code).await;
                }
            });
        }));
    }

    /// Unsolicited exit: zero is a normal stop, anything else enters the
    /// silent restart path under the budget.
    async fn handle_exit(self: Arc<Self>, key: ServerKey, client_id: String, code: Option<i32>) {
        {
            let mut instances = self.instances.lock().await;
            let Some(instance) = instances.get_mut(&key) else { return };
            if matches!(instance.status, InstanceStatus::Stopping | InstanceStatus::Stopped) {
                return;
            }
            if code == Some(0) {
                instances.remove(&key);
            } else {
                instance.status = InstanceStatus::Crashed;
                instance.client = None;
                instance.last_error = Some(format!("exited with code {code:?}"));
            }
        }
        self.documents.drop_client(&client_id).await;

        if code == Some(0) {
            info!(key = %key, "server stopped normally");
            return;
        }
        warn!(key = %key, ?code, "server crashed");

        let Some(config) = self.registry.config_by_id(&key.server_id).cloned() else {
            return;
        };
        let delay = {
            let mut history = self.restart_history.lock().await;
            let entry = history.entry(key.clone()).or_default();
            entry.prune();
            if entry.allows_spawn() {
                entry.record();
                Some(entry.backoff_delay())
            } else {
                None
            }
        };
        match delay {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                let lock = self.start_lock(&key).await;
                let _guard = lock.lock().await;
                if self.running_client(&key).await.is_some() {
                    return;
                }
                if let Err(e) = self.start_instance(&key, &config).await {
                    warn!(key = %key, "restart after crash failed: {e}");
                }
            }
            None => {
                warn!(key = %key, "restart budget exhausted, giving up");
                self.instances.lock().await.remove(&key);
            }
        }
    }

    async fn stop_instance(&self, key: &ServerKey) -> Result<()> {
        let client = {
            let mut instances = self.instances.lock().await;
            let Some(instance) = instances.get_mut(key) else { return Ok(()) };
            instance.status = InstanceStatus::Stopping;
            instance.client.take()
        };
        if let Some(client) = client {
            let client_id = client.id();
            if let Err(e) = client.shutdown().await {
                warn!(key = %key, "shutdown failed: {e}");
            }
            self.documents.drop_client(&client_id).await;
        }
        self.instances.lock().await.remove(key);
        info!(key = %key, "instance removed");
        Ok(())
    }

    async fn evict_idle(&self) {
        let idle = self.config.idle_timeout;
        let expired: Vec<ServerKey> = {
            let instances = self.instances.lock().await;
            instances
                .iter()
                .filter(|(_, i)| i.status == InstanceStatus::Running && i.last_used.elapsed() >= idle)
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in expired {
            info!(key = %key, "evicting idle server");
            if let Err(e) = self.stop_instance(&key).await {
                warn!(key = %key, "idle eviction failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(registry: ServerRegistry, config: ManagerConfig) -> ConnectionManager {
        let diagnostics = Arc::new(DiagnosticsCache::new());
        let documents = Arc::new(DocumentManager::new(diagnostics.clone()));
        ConnectionManager::new(registry, config, documents, diagnostics)
    }

    fn broken_server_registry() -> ServerRegistry {
        let config = ServerConfig::new("broken", "Broken Server")
            .command(vec!["prism-test-no-such-binary"])
            .extensions(vec!["brk"])
            .language_ids(vec!["plaintext"])
            .root_markers(vec![".git"]);
        ServerRegistry::with_overrides(&[config])
    }

    #[tokio::test]
    async fn unsupported_extension_spawns_nothing() {
        let manager = test_manager(ServerRegistry::builtin(), ManagerConfig::default());
        let err = manager
            .get_client_for_file(Path::new("/tmp/x.unknownext"))
            .await
            .unwrap_err();
        assert!(matches!(err, LspError::UnsupportedLanguage(_)));
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_server_id_is_not_found() {
        let manager = test_manager(ServerRegistry::builtin(), ManagerConfig::default());
        let err = manager.get_client("nope", Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, LspError::ServerNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_starts_back_off_then_exhaust_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(broken_server_registry(), ManagerConfig::default());
        let file = dir.path().join("x.brk");
        std::fs::write(&file, "data").unwrap();

        // First call: three spawn attempts separated by 1s and 2s backoff.
        let before = Instant::now();
        let err = manager.get_client_for_file(&file).await.unwrap_err();
        assert!(matches!(err, LspError::StartFailed(_)));
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "expected backoff sleeps, got {elapsed:?}");

        // Inside the window: fails immediately, no spawn, no sleep.
        let before = Instant::now();
        let err = manager.get_client_for_file(&file).await.unwrap_err();
        assert!(matches!(err, LspError::StartFailed(_)));
        assert!(before.elapsed() < Duration::from_millis(100));

        // After the window passes the budget refills.
        tokio::time::sleep(RESTART_WINDOW + Duration::from_secs(1)).await;
        let before = Instant::now();
        let _ = manager.get_client_for_file(&file).await.unwrap_err();
        assert!(before.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn auto_start_false_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig { auto_start: false, ..Default::default() };
        let manager = test_manager(broken_server_registry(), config);
        let file = dir.path().join("y.brk");
        std::fs::write(&file, "data").unwrap();

        let err = manager.get_client_for_file(&file).await.unwrap_err();
        assert!(matches!(err, LspError::NotReady));
        assert!(manager.list().await.is_empty());
    }

    #[test]
    fn restart_history_budget_and_backoff() {
        let mut history = RestartHistory::default();
        assert!(history.allows_spawn());

        history.record();
        assert_eq!(history.backoff_delay(), Duration::from_secs(1));
        history.record();
        assert_eq!(history.backoff_delay(), Duration::from_secs(2));
        assert!(history.allows_spawn());
        history.record();
        assert_eq!(history.backoff_delay(), Duration::from_secs(4));
        assert!(!history.allows_spawn());
    }
}
