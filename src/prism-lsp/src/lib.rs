//! LSP connection fabric for the Prism agent façade.
//!
//! Prism multiplexes one controlling agent across a fleet of language
//! server subprocesses. This crate is the core of that façade:
//! - JSON-RPC framed transport over subprocess stdio
//! - LSP client lifecycle (initialize handshake, capability gate,
//!   request correlation, cancellation, timeouts)
//! - Connection manager pooling clients by (server id, workspace root)
//!   with restart budget and idle eviction
//! - Document synchronization with monotonic versioning
//! - Diagnostics cache fed by push notifications
//! - Workspace root detection via project markers

pub mod client;
pub mod diagnostics;
pub mod documents;
pub mod manager;
pub mod markers;
pub mod position;
pub mod root;
pub mod server_config;
pub mod settings;
pub mod transport;
pub mod uri;

pub use client::{CachedServerCapabilities, LspClient, LspClientConfig};
pub use diagnostics::{Diagnostic, DiagnosticSeverity, DiagnosticsCache, SeverityFilter};
pub use documents::{DocumentManager, TextSync};
pub use manager::{ConnectionManager, InstanceSnapshot, InstanceStatus, ServerKey};
pub use root::resolve_workspace_root;
pub use server_config::{ServerConfig, ServerRegistry, BUILTIN_SERVERS};
pub use settings::Settings;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the controlling agent. Every variant carries a
/// stable machine code (`code()`) and a recovery hint (`suggestion()`).
#[derive(Error, Debug)]
pub enum LspError {
    #[error("no language server configured for '{0}'")]
    ServerNotFound(String),
    #[error("failed to start language server: {0}")]
    StartFailed(String),
    #[error("language server exited unexpectedly: {0}")]
    ServerCrashed(String),
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("language server is not initialized")]
    NotReady,
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("file not readable: {0}")]
    FileNotReadable(String),
    #[error("position {line}:{column} is out of bounds")]
    InvalidPosition { line: u32, column: u32 },
    #[error("no language server handles '{0}'")]
    UnsupportedLanguage(String),
    #[error("server does not support '{0}'")]
    CapabilityNotSupported(String),
    #[error("rename is not allowed here: {0}")]
    RenameNotAllowed(String),
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
    #[error("request was cancelled")]
    RequestCancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LspError {
    /// Stable agent-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            LspError::ServerNotFound(_) => "server-not-found",
            LspError::StartFailed(_) => "server-start-failed",
            LspError::ServerCrashed(_) => "server-crashed",
            LspError::Timeout { .. } => "server-timeout",
            LspError::NotReady => "server-not-ready",
            LspError::FileNotFound(_) => "file-not-found",
            LspError::FileNotReadable(_) | LspError::Io(_) => "file-not-readable",
            LspError::InvalidPosition { .. } => "invalid-position",
            LspError::UnsupportedLanguage(_) => "unsupported-language",
            LspError::CapabilityNotSupported(_) => "capability-not-supported",
            LspError::RenameNotAllowed(_) => "rename-not-allowed",
            LspError::InvalidResponse(_) | LspError::Json(_) => "invalid-response",
            LspError::RequestCancelled => "request-cancelled",
        }
    }

    /// Human recovery hint shown next to the error message.
    pub fn suggestion(&self) -> &'static str {
        match self {
            LspError::ServerNotFound(_) => {
                "Check the server id against server_status, or add the server to prism.json."
            }
            LspError::StartFailed(_) => {
                "Verify the server command is installed and on PATH, then retry."
            }
            LspError::ServerCrashed(_) => {
                "The server will be restarted automatically if the restart budget allows; retry shortly."
            }
            LspError::Timeout { .. } => {
                "The server may still be indexing; retry, or raise requestTimeout in prism.json."
            }
            LspError::NotReady => "Wait for the server to finish initializing and retry.",
            LspError::FileNotFound(_) => "Check that the path is absolute and the file exists.",
            LspError::FileNotReadable(_) | LspError::Io(_) => {
                "Only text files up to 10 MiB can be opened; check permissions and file type."
            }
            LspError::InvalidPosition { .. } => {
                "Lines and columns are 1-based; make sure they fall inside the document."
            }
            LspError::UnsupportedLanguage(_) => {
                "No configured server claims this file extension; add one to prism.json."
            }
            LspError::CapabilityNotSupported(_) => {
                "This language server does not implement the requested feature."
            }
            LspError::RenameNotAllowed(_) => {
                "The symbol at this position cannot be renamed; pick the symbol's name token."
            }
            LspError::InvalidResponse(_) | LspError::Json(_) => {
                "The server sent an unexpected reply; retry or restart the server."
            }
            LspError::RequestCancelled => "The request was cancelled before completion; retry.",
        }
    }
}

pub type Result<T> = std::result::Result<T, LspError>;
