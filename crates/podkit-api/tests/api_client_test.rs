#![allow(clippy::unwrap_used)]

use futures_util::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use podkit_api::stream::demux;
use podkit_api::transport::TcpTransport;
use podkit_api::{ApiClient, Error, Filters, Frame, Request, StreamType, Transport, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let addr = server.address();
    let cancel = CancellationToken::new();
    let transport = TcpTransport::new(
        &addr.ip().to_string(),
        addr.port(),
        false,
        TransportConfig::default(),
        cancel.clone(),
    )
    .unwrap();
    let client = ApiClient::new(
        Transport::Tcp(transport),
        "5.0.0",
        "1.40",
        "podkit-test",
        cancel,
    );
    (server, client)
}

fn framed(frames: &[(u8, &[u8])]) -> Vec<u8> {
    let mut wire = Vec::new();
    for (tag, payload) in frames {
        wire.push(*tag);
        wire.extend_from_slice(&[0, 0, 0]);
        wire.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_be_bytes());
        wire.extend_from_slice(payload);
    }
    wire
}

// ── Base paths and encoding ─────────────────────────────────────────

#[tokio::test]
async fn test_get_json_under_libpod_base_path() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v5.0.0/libpod/containers/json"))
        .and(query_param("all", "true"))
        .and(query_param("filters", r#"{"status":["running"]}"#))
        .and(header("user-agent", "podkit-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"Id": "abc"}])))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::get("/containers/json")
        .query("all", true)
        .filters(&Filters::new().with("status", "running"));
    let body: Value = client.send_json(request).await.unwrap();

    assert_eq!(body, json!([{"Id": "abc"}]));
}

#[tokio::test]
async fn test_compat_requests_use_compat_base_path() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1.40/auth"))
        .and(body_json(json!({"username": "me"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Status": "Login Succeeded"})))
        .mount(&server)
        .await;

    let request = Request::post("/auth")
        .compat()
        .json(&json!({"username": "me"}))
        .unwrap();
    let body: Value = client.send_json(request).await.unwrap();

    assert_eq!(body["Status"], "Login Succeeded");
}

// ── Error translation ───────────────────────────────────────────────

#[tokio::test]
async fn test_error_envelopes_become_typed_errors() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v5.0.0/libpod/containers/missing/json"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "cause": "no such container",
            "message": "no container with name or ID \"missing\" found: no such container",
            "response": 404
        })))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/v5.0.0/libpod/containers/busy"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "cause": "container state improper",
            "message": "cannot remove container busy as it is running",
            "response": 409
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v5.0.0/libpod/containers/broken/start"))
        .respond_with(ResponseTemplate::new(500).set_body_string("runtime exploded"))
        .mount(&server)
        .await;

    let err = client
        .send(Request::get("/containers/missing/json"))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err:?}");

    let err = client
        .send(Request::delete("/containers/busy"))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "{err:?}");
    assert!(err.to_string().contains("as it is running"));

    let err = client
        .send(Request::post("/containers/broken/start"))
        .await
        .unwrap_err();
    match err {
        Error::Api { status, message, .. } => {
            assert_eq!(status, 500);
            assert_eq!(message, "runtime exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_execute_returns_status_without_failing() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v5.0.0/libpod/images/nope/exists"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = client
        .execute(Request::get("/images/nope/exists"))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 404);
}

#[tokio::test]
async fn test_bad_json_is_a_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v5.0.0/libpod/info"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client
        .send_json::<Value>(Request::get("/info"))
        .await
        .unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "<html>"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_connection_error() {
    let cancel = CancellationToken::new();
    // Port 9 (discard) is closed on test hosts.
    let transport =
        TcpTransport::new("127.0.0.1", 9, false, TransportConfig::default(), cancel.clone())
            .unwrap();
    let client = ApiClient::new(Transport::Tcp(transport), "5.0.0", "1.40", "t", cancel);

    let err = client.send(Request::get("/_ping")).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "{err:?}");
    assert!(err.is_transient());
}

// ── Streaming ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_streamed_logs_are_demultiplexed() {
    let (server, client) = setup().await;

    let wire = framed(&[(1, b"hello\n"), (2, b"oops\n"), (1, b"bye\n")]);
    Mock::given(method("GET"))
        .and(path("/v5.0.0/libpod/containers/web/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(wire))
        .mount(&server)
        .await;

    let response = client
        .send_streaming(Request::get("/containers/web/logs").query("stdout", true))
        .await
        .unwrap();
    let frames: Vec<Frame> = demux(response.body).try_collect().await.unwrap();

    assert_eq!(
        frames,
        vec![
            Frame::new(StreamType::Stdout, "hello\n"),
            Frame::new(StreamType::Stderr, "oops\n"),
            Frame::new(StreamType::Stdout, "bye\n"),
        ]
    );
}

#[tokio::test]
async fn test_streaming_error_status_is_translated() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v5.0.0/libpod/containers/gone/logs"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "gone"})))
        .mount(&server)
        .await;

    let err = client
        .send_streaming(Request::get("/containers/gone/logs"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_closed_client_refuses_requests() {
    let (_server, client) = setup().await;
    client.close();

    let err = client.send(Request::get("/_ping")).await.unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert!(client.is_closed());
}
