//! LSP client timeout configuration.

use std::time::Duration;

/// Default timeout for LSP requests, shared by the initialize handshake.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-client tunables, derived from settings by the connection manager.
#[derive(Debug, Clone)]
pub struct LspClientConfig {
    /// Deadline applied to every request, including `initialize`.
    pub request_timeout: Duration,
}

impl Default for LspClientConfig {
    fn default() -> Self {
        Self { request_timeout: DEFAULT_REQUEST_TIMEOUT }
    }
}

impl LspClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
