//! End-to-end tests against a real listener.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::routing::get;
use axum::{Router, ServiceExt};
use devreload::{LiveReload, WATCH_PATH};
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    dir: TempDir,
    addr: SocketAddr,
    reload: LiveReload<Router>,
    server: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let app = Router::new().route("/", get(|| async { "Hello, World!" }));
        let reload = LiveReload::new(app, dir.path()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = reload
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let server = tokio::spawn(async move {
            axum::serve(listener, service).await.unwrap();
        });

        Self {
            dir,
            addr,
            reload,
            server,
        }
    }

    async fn connect(&self) -> Client {
        let url = format!("ws://{}{WATCH_PATH}", self.addr);
        let (client, _response) = timeout(WAIT, connect_async(url))
            .await
            .expect("connect timed out")
            .unwrap();
        client
    }

    async fn shutdown(self) {
        self.reload.close().await.unwrap();
        self.server.abort();
    }
}

/// Issue a plain HTTP/1.1 GET and return the raw response.
async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), "anything").unwrap();
}

/// Read the reload message and the close frame that follows it.
async fn expect_reload(client: &mut Client) {
    let msg = timeout(WAIT, client.next())
        .await
        .expect("timed out waiting for reload")
        .expect("stream ended before reload")
        .unwrap();
    match msg {
        Message::Text(text) => assert_eq!(text, "reload"),
        other => panic!("expected text message, got {other:?}"),
    }

    let msg = timeout(WAIT, client.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended before close frame")
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason, "Reloading");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

/// Assert the connection ends without ever delivering a text message.
async fn expect_closed_silently(client: &mut Client) {
    loop {
        let next = timeout(WAIT, client.next())
            .await
            .expect("connection was not closed");
        match next {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(Message::Text(text))) => panic!("unexpected message {text:?}"),
            Some(Ok(_)) => {}
        }
    }
}

async fn wait_for_connections(reload: &LiveReload<Router>, expected: usize) {
    timeout(WAIT, async {
        while reload.connection_count() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

#[tokio::test]
async fn test_get_is_served_by_app() {
    let server = TestServer::start().await;

    let response = http_get(server.addr, "/").await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(
        response
            .to_ascii_lowercase()
            .contains("cache-control: no-cache"),
        "{response}"
    );
    assert!(response.ends_with("Hello, World!"), "{response}");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_write_reloads_every_connection() {
    let server = TestServer::start().await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(server.connect().await);
    }

    touch(server.dir.path(), "test.txt");

    for client in &mut clients {
        expect_reload(client).await;
    }

    wait_for_connections(&server.reload, 0).await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connect_then_write_never_misses() {
    let server = TestServer::start().await;
    let addr = server.addr;
    let dir = server.dir.path().to_path_buf();

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let dir = dir.clone();
            tokio::spawn(async move {
                let url = format!("ws://{addr}{WATCH_PATH}");
                let (mut client, _) = connect_async(url).await.unwrap();
                touch(&dir, &format!("page-{i}.html"));
                expect_reload(&mut client).await;
            })
        })
        .collect();

    for task in tasks {
        timeout(WAIT, task).await.expect("client timed out").unwrap();
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_releases_waiting_connections() {
    let server = TestServer::start().await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(server.connect().await);
    }
    wait_for_connections(&server.reload, 3).await;

    timeout(WAIT, server.reload.close())
        .await
        .expect("close timed out")
        .unwrap();
    assert_eq!(server.reload.connection_count(), 0);

    for client in &mut clients {
        expect_closed_silently(client).await;
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_disconnect_ends_connection_task() {
    let server = TestServer::start().await;

    let mut client = server.connect().await;
    wait_for_connections(&server.reload, 1).await;

    client.close(None).await.unwrap();
    wait_for_connections(&server.reload, 0).await;

    server.shutdown().await;
}

/// Perform the upgrade by hand so the client never answers a close frame.
async fn raw_upgrade(addr: SocketAddr) -> (TcpStream, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {WATCH_PATH} HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\n\
         Upgrade: websocket\r\nSec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 1024];
        let n = timeout(WAIT, stream.read(&mut chunk)).await.unwrap().unwrap();
        assert!(n > 0, "connection closed during handshake");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");
    (stream, buf.split_off(header_end))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unanswered_close_frame_releases_connection() {
    let server = TestServer::start().await;

    let (mut stream, mut frames) = raw_upgrade(server.addr).await;
    wait_for_connections(&server.reload, 1).await;

    touch(server.dir.path(), "page.html");

    // Unmasked text frame carrying "reload"
    let expected = [&[0x81_u8, 0x06][..], &b"reload"[..]].concat();
    while frames.len() < expected.len() {
        let mut chunk = [0u8; 64];
        let n = timeout(WAIT, stream.read(&mut chunk)).await.unwrap().unwrap();
        assert!(n > 0, "connection closed before reload");
        frames.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(&frames[..expected.len()], expected.as_slice());

    // Hold the socket open without replying to the close frame
    timeout(Duration::from_secs(10), async {
        while server.reload.connection_count() != 0 {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("connection task outlived the close handshake timeout");

    drop(stream);
    server.shutdown().await;
}

#[tokio::test]
async fn test_zero_connections_write_is_harmless() {
    let server = TestServer::start().await;

    touch(server.dir.path(), "lonely.txt");
    sleep(Duration::from_millis(100)).await;

    let mut client = server.connect().await;
    touch(server.dir.path(), "second.txt");
    expect_reload(&mut client).await;

    server.shutdown().await;
}
