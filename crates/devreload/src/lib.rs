//! Live reload middleware for development servers.
//!
//! Wraps any `tower` service (an axum [`Router`](axum::Router), for example)
//! and adds a WebSocket endpoint at [`WATCH_PATH`]. Every directory under a
//! root is watched; when a file is created or written, each open watch
//! connection receives one `reload` message and is closed. The browser side
//! is [`CLIENT_SCRIPT`], which reloads the page and reconnects.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::net::SocketAddr;
//!
//! use axum::{Router, ServiceExt, response::Html, routing::get};
//! use devreload::{LiveReload, inject_script};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let page = inject_script("<html><body><h1>Hello</h1></body></html>");
//!     let app = Router::new().route("/", get(move || async move { Html(page) }));
//!
//!     let reload = LiveReload::new(app, "public")?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8090").await?;
//!     axum::serve(
//!         listener,
//!         reload.clone().into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await?;
//!
//!     reload.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! notify ──► ChangeWatcher ──publish──► Relay
//!                                         │ one Subscription per connection
//!                                         ▼
//! Browser ──/watch──► LiveReload ──► WebSocket handler ──"reload"──► Browser
//!         ──other───► LiveReload ──► app (Cache-Control: no-cache)
//! ```
//!
//! Shutdown goes through [`LiveReload::close`], which cancels the watcher and
//! every waiting connection.
//!
//! Directories created after startup are not watched.

mod error;
mod middleware;
mod relay;
mod reloader;
mod script;
mod watcher;
mod websocket;

pub use error::{CloseError, ConnectionError, SetupError};
pub use relay::{Relay, RelayClosed, Subscription};
pub use reloader::{LiveReload, WATCH_PATH};
pub use script::{CLIENT_SCRIPT, inject_script};
pub use watcher::{ChangeWatcher, is_reload_event};
