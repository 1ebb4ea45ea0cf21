//! Live reload coordinator.
//!
//! Owns the watcher task, the relay and the shutdown token, and dispatches
//! requests between the watch endpoint and the wrapped application.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::Service;
use tower_http::set_header::SetResponseHeader;

use crate::error::{CloseError, SetupError};
use crate::middleware::cache;
use crate::relay::{Relay, Subscription};
use crate::watcher::ChangeWatcher;
use crate::websocket;

/// Path of the live reload WebSocket endpoint.
pub const WATCH_PATH: &str = "/watch";

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// State shared by every clone of a [`LiveReload`].
struct Shared {
    relay: Relay,
    cancel: CancellationToken,
    watcher_task: Mutex<Option<JoinHandle<()>>>,
    watcher: TaskTracker,
    connections: TaskTracker,
    watched_dirs: Vec<PathBuf>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last handle gone without close(); stop the watcher anyway
        self.cancel.cancel();
    }
}

/// Live reload middleware around an application service.
///
/// Requests to [`WATCH_PATH`] are upgraded to a WebSocket that receives a
/// single `reload` message on the next file change. Every other request goes
/// to the wrapped service, and its response is marked `Cache-Control:
/// no-cache`.
///
/// Clones share the same watcher and relay.
///
/// # Example
///
/// ```ignore
/// use std::net::SocketAddr;
///
/// use axum::{Router, ServiceExt, routing::get};
/// use devreload::LiveReload;
///
/// let app = Router::new().route("/", get(|| async { "Hello, World!" }));
/// let reload = LiveReload::new(app, "public")?;
///
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8090").await?;
/// axum::serve(
///     listener,
///     reload.clone().into_make_service_with_connect_info::<SocketAddr>(),
/// )
/// .await?;
///
/// reload.close().await?;
/// ```
pub struct LiveReload<S> {
    app: SetResponseHeader<S, HeaderValue>,
    shared: Arc<Shared>,
}

impl<S: Clone> Clone for LiveReload<S> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> LiveReload<S> {
    /// Start watching `root` and wrap `app`.
    ///
    /// Spawns the watcher task on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if the directory tree cannot be registered with
    /// the filesystem watcher.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(app: S, root: impl AsRef<Path>) -> Result<Self, SetupError> {
        let root = root.as_ref();
        let watcher = ChangeWatcher::new(root)?;
        let watched_dirs = watcher.watched_dirs().to_vec();

        let relay = Relay::new();
        let cancel = CancellationToken::new();
        let watcher_tracker = TaskTracker::new();
        let watcher_task = watcher_tracker.spawn(watcher.run(relay.clone(), cancel.clone()));

        tracing::info!(
            root = %root.display(),
            dirs = watched_dirs.len(),
            "Live reload watching for changes"
        );

        Ok(Self {
            app: cache::no_cache(app),
            shared: Arc::new(Shared {
                relay,
                cancel,
                watcher_task: Mutex::new(Some(watcher_task)),
                watcher: watcher_tracker,
                connections: TaskTracker::new(),
                watched_dirs,
            }),
        })
    }

    /// Subscribe to the next reload signal.
    ///
    /// Watch connections use the same relay, so this observes exactly what the
    /// browsers observe.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.relay.subscribe()
    }

    /// Directories registered with the filesystem watcher.
    #[must_use]
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.shared.watched_dirs
    }

    /// Number of watch connections currently open.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Stop watching and release every waiting connection.
    ///
    /// Cancels the shutdown token, waits for the watcher task to exit, then
    /// waits for open watch connections to finish. Waiting connections are
    /// closed without a reload message. Every call, including concurrent
    /// ones, returns only after the watcher task has exited.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError::WatcherTask`] if the watcher task panicked. Only
    /// the call that collects the task's result reports this.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.shared.cancel.cancel();

        let watcher_task = self
            .shared
            .watcher_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let result = match watcher_task {
            Some(task) => task.await.map_err(CloseError::from),
            None => Ok(()),
        };

        // The join handle goes to one caller only; the tracker is shared
        self.shared.watcher.close();
        self.shared.watcher.wait().await;

        self.shared.connections.close();
        self.shared.connections.wait().await;

        tracing::info!(reason = "reloader closed", "Live reload stopped");
        result
    }
}

impl<S> Service<Request> for LiveReload<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.app.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        if req.uri().path() == WATCH_PATH {
            let shared = Arc::clone(&self.shared);
            return Box::pin(async move {
                let Shared {
                    relay,
                    cancel,
                    connections,
                    ..
                } = &*shared;
                Ok(websocket::accept(req, relay, cancel, connections).await)
            });
        }

        // Use the service that was driven to readiness
        let ready = self.app.clone();
        let mut app = std::mem::replace(&mut self.app, ready);
        Box::pin(app.call(req))
    }
}
