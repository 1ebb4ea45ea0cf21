//! Filesystem watcher that turns raw events into reload signals.
//!
//! Every directory under the root is registered with `notify` once, at
//! construction. Directories created afterwards are not picked up; restart
//! the watcher to include them.

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::SetupError;
use crate::relay::Relay;

/// Raw event stream produced by the `notify` callback.
type EventStream = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Watches a directory tree and publishes reload signals.
pub struct ChangeWatcher {
    watcher: RecommendedWatcher,
    events: EventStream,
    watched_dirs: Vec<PathBuf>,
}

impl ChangeWatcher {
    /// Register every directory beneath `root` (inclusive) for change
    /// notifications.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if the notify backend cannot be created, the
    /// tree cannot be walked, or a directory cannot be registered.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SetupError> {
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver is gone once the watch loop has exited
            let _ = tx.send(res);
        })
        .map_err(SetupError::Backend)?;

        let watched_dirs = collect_dirs(root.as_ref())?;
        for dir in &watched_dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| SetupError::Register {
                    path: dir.clone(),
                    source,
                })?;
        }

        tracing::debug!(
            root = %root.as_ref().display(),
            dirs = watched_dirs.len(),
            "Registered directories for watching"
        );

        Ok(Self {
            watcher,
            events,
            watched_dirs,
        })
    }

    /// Absolute paths of the registered directories.
    #[must_use]
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched_dirs
    }

    /// Run the watch loop until `cancel` fires or the event stream ends.
    ///
    /// Closes `relay` on exit.
    pub async fn run(self, relay: Relay, cancel: CancellationToken) {
        let Self { watcher, events, .. } = self;

        watch_loop(events, &relay, &cancel).await;

        drop(watcher);
        relay.close();
        tracing::info!("Stopping file watcher");
    }
}

/// Whether an event kind should trigger a reload.
///
/// Creations and content writes qualify. Renames, removals, metadata changes
/// and access events do not.
#[must_use]
pub fn is_reload_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
    )
}

async fn watch_loop(mut events: EventStream, relay: &Relay, cancel: &CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            next = events.recv() => match next {
                None => {
                    tracing::warn!("File watcher event stream closed");
                    return;
                }
                Some(Ok(event)) => {
                    if is_reload_event(&event.kind) {
                        tracing::info!(paths = ?event.paths, kind = ?event.kind, "File modified");
                        relay.publish();
                    }
                }
                Some(Err(err)) => {
                    tracing::error!(error = %err, paths = ?err.paths, "Error watching file");
                }
            },
        }
    }
}

/// Enumerate `root` and every directory beneath it as absolute paths.
fn collect_dirs(root: &Path) -> Result<Vec<PathBuf>, SetupError> {
    let mut dirs = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let path = std::path::absolute(entry.path()).map_err(|source| SetupError::Resolve {
            path: entry.path().to_path_buf(),
            source,
        })?;
        dirs.push(path);
    }

    Ok(dirs)
}
