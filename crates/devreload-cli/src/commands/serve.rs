//! `devreload serve` command implementation.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::ServiceExt;
use clap::Args;
use devreload::LiveReload;
use devreload_config::{CliSettings, Config};
use tokio::net::TcpListener;

use crate::error::CliError;
use crate::output::Output;
use crate::static_files;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover devreload.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to serve and watch (overrides config).
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose output (connection and watcher logs).
    #[arg(short, long)]
    pub verbose: bool,

    /// Add the reload client script to served HTML (default: enabled).
    #[arg(long)]
    inject_script: Option<bool>,

    /// Serve HTML unchanged.
    #[arg(long, conflicts_with = "inject_script")]
    no_inject_script: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails, the root cannot be watched, or
    /// the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            inject_script: self.resolve_inject_script(),
            host: self.host,
            port: self.port,
            root: self.root,
        };

        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        let root = config.watch_resolved.root.clone();
        if !root.is_dir() {
            return Err(CliError::Validation(format!(
                "Root is not a directory: {}",
                root.display()
            )));
        }

        let inject_script = config.watch_resolved.inject_script;
        let app = static_files::static_router(root.clone(), inject_script);
        let reload = LiveReload::new(app, &root)?;

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "Starting server");

        output.highlight(&format!("Serving on http://{local_addr}"));
        output.info(&format!("Root directory: {}", root.display()));
        output.info(&format!(
            "Watching {} directories",
            reload.watched_dirs().len()
        ));
        if inject_script {
            output.info("Script injection: enabled");
        } else {
            output.info("Script injection: disabled");
        }

        let service = reload
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        reload.close().await?;
        output.success("Server stopped");

        Ok(())
    }

    /// Resolve `inject_script` from --inject-script/--no-inject-script flags.
    fn resolve_inject_script(&self) -> Option<bool> {
        self.no_inject_script.then_some(false).or(self.inject_script)
    }
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
    Output::new().warning("Shutting down");
}
