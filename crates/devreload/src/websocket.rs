//! WebSocket handler for the watch endpoint.
//!
//! Each connection carries at most one reload message: the handler waits for
//! the next relay signal, sends `reload`, and closes. A page reload opens a
//! fresh connection.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::ConnectionError;
use crate::relay::{Relay, Subscription};

/// Payload pushed to the browser when files change.
pub(crate) const RELOAD_MESSAGE: &str = "reload";

/// Close reason sent after the reload message.
pub(crate) const CLOSE_REASON: &str = "Reloading";

/// How long the client gets to answer our close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a waiting connection woke up.
#[derive(Debug)]
enum Wake {
    /// A reload signal arrived.
    Reload,
    /// The reloader is shutting down.
    Shutdown,
    /// The client went away first.
    Disconnected,
}

/// Accept a watch request.
///
/// The relay subscription is registered before the handshake response is
/// returned, so a client that completed the handshake never misses a signal.
pub(crate) async fn accept(
    req: Request,
    relay: &Relay,
    cancel: &CancellationToken,
    tracker: &TaskTracker,
) -> Response {
    let (mut parts, _body) = req.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let upgrade = <WebSocketUpgrade as FromRequestParts<()>>::from_request_parts(&mut parts, &());
    let ws = match upgrade.await {
        Ok(ws) => ws,
        Err(rejection) => {
            let status = rejection.status();
            let err = ConnectionError::Handshake(rejection);
            tracing::error!(error = %err, ?remote_addr, "Failed to accept websocket connection");
            return status.into_response();
        }
    };

    let subscription = relay.subscribe();
    let cancel = cancel.clone();
    let tracker = tracker.clone();

    ws.on_failed_upgrade(move |e| {
        let err = ConnectionError::Upgrade(e);
        tracing::error!(error = %err, ?remote_addr, "Failed to upgrade websocket connection");
    })
    .on_upgrade(move |socket| {
        tracker.track_future(handle_socket(socket, subscription, cancel, remote_addr))
    })
}

/// Drive an established connection to completion.
async fn handle_socket(
    mut socket: WebSocket,
    mut subscription: Subscription,
    cancel: CancellationToken,
    remote_addr: Option<SocketAddr>,
) {
    tracing::info!(?remote_addr, "WebSocket connection established");

    let wake = wait_for_reload(&mut socket, &mut subscription, &cancel).await;
    drop(subscription);

    match wake {
        Wake::Reload => {
            tracing::info!(?remote_addr, "Sending reload message to client");
            if cancel.run_until_cancelled(notify(&mut socket)).await.is_none() {
                tracing::info!(?remote_addr, "Reloader closed while notifying client");
            }
        }
        Wake::Shutdown => {
            tracing::info!(?remote_addr, "Reloader closed, closing WebSocket connection");
        }
        Wake::Disconnected => {
            tracing::debug!(?remote_addr, "Client disconnected before reload");
        }
    }

    tracing::info!(?remote_addr, "WebSocket connection closed");
}

/// Block until a reload signal, shutdown, or client disconnect.
///
/// Frames the client sends while waiting are discarded.
async fn wait_for_reload(
    socket: &mut WebSocket,
    subscription: &mut Subscription,
    cancel: &CancellationToken,
) -> Wake {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Wake::Shutdown,
            result = subscription.recv() => {
                // A closed relay means the watcher has stopped
                return match result {
                    Ok(()) => Wake::Reload,
                    Err(_) => Wake::Shutdown,
                };
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return Wake::Disconnected,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Send the reload message and close with a normal-closure status.
async fn notify(socket: &mut WebSocket) {
    if let Err(e) = socket.send(Message::Text(RELOAD_MESSAGE.into())).await {
        let err = ConnectionError::Notification(e);
        tracing::error!(error = %err, "Failed to send reload message");
        return;
    }

    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: CLOSE_REASON.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
        return;
    }

    // Wait for the client's half of the closing handshake
    let drain = async { while let Some(Ok(_)) = socket.recv().await {} };
    if tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, drain)
        .await
        .is_err()
    {
        tracing::debug!("Client did not complete close handshake");
    }
}
