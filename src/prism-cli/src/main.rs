//! The `prism` binary: stdio server wiring, logging, signals.

use anyhow::Result;
use clap::Parser;
use prism_lsp::Settings;
use prism_mcp_server::{AgentServer, ToolContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prism", version, about = "Language server tools for coding agents over stdio")]
struct Cli {
    /// Config file path (overrides the default lookup order).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level: debug, info, warn, error.
    #[arg(long)]
    log_level: Option<String>,

    /// Force one workspace root instead of per-file detection.
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

fn load_settings(cli: &Cli) -> Settings {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path).unwrap_or_default(),
        None => Settings::load(),
    };
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    settings
}

fn init_tracing(level: &str) {
    // stdout carries the protocol; logs go to stderr only.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("prism_lsp={level},prism_mcp_server={level},prism={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli);
    init_tracing(&settings.log_level);

    if let Some(root) = &cli.workspace_root {
        if !root.is_dir() {
            anyhow::bail!("--workspace-root {} is not a directory", root.display());
        }
    }

    info!(
        servers = settings.registry().all().len(),
        timeout_ms = settings.request_timeout,
        "starting prism"
    );

    let context = Arc::new(ToolContext::new(settings, cli.workspace_root.clone()));
    let server = Arc::new(AgentServer::new(context.clone()));

    let serving = server.clone().run_stdio();
    tokio::pin!(serving);

    let outcome = tokio::select! {
        result = &mut serving => result,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            server.stop().await;
            Ok(())
        }
    };

    // Every language server gets a graceful shutdown before exit.
    context.connections.stop_all().await;
    outcome
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("prism: fatal: {e}");
        std::process::exit(1);
    }
}
