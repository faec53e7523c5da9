#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use podkit_api::stream::demux;
use http::{HeaderMap, HeaderValue, Method};
use podkit_api::transport::{RequestBody, TransportRequest, UnixTransport};
use podkit_api::{ApiClient, Error, Frame, Request, StreamType, Transport, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn client_for(socket: &Path) -> ApiClient {
    let cancel = CancellationToken::new();
    let transport = UnixTransport::new(socket, TransportConfig::default(), cancel.clone());
    ApiClient::new(Transport::Unix(transport), "5.0.0", "1.40", "podkit-test", cancel)
}

/// Read one request head; `None` once the peer hung up.
async fn read_head(stream: &mut UnixStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0_u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return None,
        }
    }
    Some(String::from_utf8(head).unwrap())
}

async fn write_json(stream: &mut UnixStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
}

/// Answer one request per connection, then hang up without telling the
/// client (no `Connection: close`).
fn spawn_one_shot_server(socket: &Path) -> Arc<AtomicUsize> {
    let listener = UnixListener::bind(socket).unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(async move {
                if read_head(&mut stream).await.is_some() {
                    write_json(&mut stream, &format!(r#"{{"connection":{n}}}"#)).await;
                }
                let _ = stream.shutdown().await;
            });
        }
    });
    connections
}

/// Serve every request on a connection until the client hangs up.
fn spawn_keep_alive_server(socket: &Path) -> Arc<AtomicUsize> {
    let listener = UnixListener::bind(socket).unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut served = 0;
                while let Some(head) = read_head(&mut stream).await {
                    served += 1;
                    let path = head.split_whitespace().nth(1).unwrap_or_default().to_owned();
                    write_json(&mut stream, &format!(r#"{{"served":{served},"path":"{path}"}}"#))
                        .await;
                }
            });
        }
    });
    connections
}

/// Answer every request with the `User-Agent` it carried.
fn spawn_user_agent_echo(socket: &Path) {
    let listener = UnixListener::bind(socket).unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                while let Some(head) = read_head(&mut stream).await {
                    let agent = head
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("user-agent").then(|| value.trim().to_owned())
                        })
                        .unwrap_or_default();
                    write_json(&mut stream, &format!(r#"{{"agent":"{agent}"}}"#)).await;
                }
            });
        }
    });
}

fn get(path: &str, headers: HeaderMap) -> TransportRequest {
    TransportRequest {
        method: Method::GET,
        path: path.to_owned(),
        headers,
        body: RequestBody::Empty,
        timeout: None,
    }
}

// ── Headers ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_configured_user_agent_is_sent_unless_overridden() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("podman.sock");
    spawn_user_agent_echo(&socket);
    let config = TransportConfig {
        user_agent: "podkit-unix/1".into(),
        ..TransportConfig::default()
    };
    let transport = UnixTransport::new(&socket, config, CancellationToken::new());

    let response = transport.request(get("/_ping", HeaderMap::new())).await.unwrap();
    let body: Value = response.json().unwrap();
    assert_eq!(body["agent"], "podkit-unix/1");

    let mut headers = HeaderMap::new();
    headers.insert(http::header::USER_AGENT, HeaderValue::from_static("caller/2"));
    let response = transport.request(get("/_ping", headers)).await.unwrap();
    let body: Value = response.json().unwrap();
    assert_eq!(body["agent"], "caller/2");
}

// ── Keep-alive and reconnect ────────────────────────────────────────

#[tokio::test]
async fn test_requests_reuse_keep_alive_connection() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("podman.sock");
    let connections = spawn_keep_alive_server(&socket);
    let client = client_for(&socket);

    for expected in 1..=3 {
        let body: Value = client.send_json(Request::get("/info")).await.unwrap();
        assert_eq!(body["served"], expected);
        assert_eq!(body["path"], "/v5.0.0/libpod/info");
    }
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnects_after_peer_closed_idle_connection() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("podman.sock");
    let connections = spawn_one_shot_server(&socket);
    let client = client_for(&socket);

    let first: Value = client.send_json(Request::get("/_ping")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second: Value = client.send_json(Request::get("/_ping")).await.unwrap();
    // No pause at all: the closed connection may only be noticed on send.
    let third: Value = client.send_json(Request::get("/_ping")).await.unwrap();

    assert_eq!(first["connection"], 1);
    assert_eq!(second["connection"], 2);
    assert_eq!(third["connection"], 3);
    assert_eq!(connections.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_socket_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_for(&dir.path().join("absent.sock"));

    let err = client.send(Request::get("/_ping")).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "{err:?}");
}

// ── Streaming ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_follow_stream_ends_when_client_closes() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("podman.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_head(&mut stream).await.unwrap();
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: application/vnd.docker.multiplexed-stream\r\n\
                  Transfer-Encoding: chunked\r\n\r\n",
            )
            .await
            .unwrap();

        // One frame, written a few bytes at a time.
        let frame = b"\x01\x00\x00\x00\x00\x00\x00\x06line 1";
        stream
            .write_all(format!("{:x}\r\n", frame.len()).as_bytes())
            .await
            .unwrap();
        for piece in frame.chunks(3) {
            stream.write_all(piece).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stream.write_all(b"\r\n").await.unwrap();

        // Then keep the stream open forever, like `logs --follow`.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        drop(stream);
    });

    let client = client_for(&socket);
    let response = client
        .send_streaming(Request::get("/containers/web/logs").query("follow", true))
        .await
        .unwrap();
    let mut frames = demux(response.body);

    let first = frames.next().await.unwrap().unwrap();
    assert_eq!(first, Frame::new(StreamType::Stdout, "line 1"));

    client.close();
    let next = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("stream did not end after close");
    assert!(next.is_none() || next.unwrap().is_err());
}
