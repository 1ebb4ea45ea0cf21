//! Live reload error types.

use std::path::PathBuf;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;

/// Failure while setting up the directory watcher.
///
/// Returned from [`LiveReload::new`](crate::LiveReload::new); the middleware
/// is unusable without a working watcher.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The notify backend could not be created.
    #[error("failed to create filesystem watcher: {0}")]
    Backend(#[source] notify::Error),
    /// The directory tree could not be walked.
    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    /// A directory path could not be made absolute.
    #[error("failed to get absolute path for {}: {source}", path.display())]
    Resolve {
        /// Path as found during the walk.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A directory could not be registered with the watcher.
    #[error("failed to add {} to watcher: {source}", path.display())]
    Register {
        /// Directory that failed to register.
        path: PathBuf,
        /// Underlying notify error.
        #[source]
        source: notify::Error,
    },
}

/// Failure on a single watch connection.
///
/// These never leave the connection they happened on; they are logged and the
/// connection is dropped.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The request was not a valid WebSocket handshake.
    #[error("websocket handshake rejected: {0}")]
    Handshake(#[from] WebSocketUpgradeRejection),
    /// The connection could not be upgraded after the handshake response.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[source] axum::Error),
    /// The reload message could not be delivered.
    #[error("failed to send reload message: {0}")]
    Notification(#[source] axum::Error),
}

/// Failure while shutting down.
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    /// The watcher task panicked or was aborted.
    #[error("file watcher task failed: {0}")]
    WatcherTask(#[from] tokio::task::JoinError),
}
