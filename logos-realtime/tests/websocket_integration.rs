//! End-to-end tests against a real WebSocket server on localhost.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::SinkExt;
use logos_realtime::{
    ClientConfig, ConnectionStatus, Envelope, RealtimeClient, SupervisorPhase,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;

/// How the test server treats each accepted connection.
#[derive(Clone, Copy)]
enum Behavior {
    /// Send the frames and keep the socket open.
    Stream,
    /// Send the frames, then drop the connection.
    SendThenDrop,
    /// Refuse the handshake with HTTP 401.
    Reject,
}

struct TestServer {
    url: String,
    connections: Arc<AtomicUsize>,
    auth_headers: mpsc::UnboundedReceiver<Option<String>>,
}

/// Start a server on a free port that sends `frames` to every client.
async fn start_test_server(behavior: Behavior, frames: Vec<String>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));
    let (header_tx, header_rx) = mpsc::unbounded_channel();

    let counter = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let frames = frames.clone();
            let header_tx = header_tx.clone();
            tokio::spawn(async move {
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let auth = req
                        .headers()
                        .get(http::header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = header_tx.send(auth);
                    if matches!(behavior, Behavior::Reject) {
                        return Err(http::Response::builder()
                            .status(http::StatusCode::UNAUTHORIZED)
                            .body(None)
                            .unwrap());
                    }
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };
                for frame in frames {
                    if ws.send(Message::text(frame)).await.is_err() {
                        return;
                    }
                }
                match behavior {
                    Behavior::SendThenDrop => drop(ws),
                    _ => tokio::time::sleep(Duration::from_secs(30)).await,
                }
            });
        }
    });

    TestServer {
        url: format!("ws://127.0.0.1:{port}"),
        connections,
        auth_headers: header_rx,
    }
}

fn comment(id: &str) -> String {
    serde_json::json!({"topic": "doc-42", "type": "comment:new", "payload": {"id": id}}).to_string()
}

fn forward_to(tx: mpsc::UnboundedSender<Envelope>) -> impl Fn(&Envelope) + Send + Sync + 'static {
    move |event: &Envelope| {
        let _ = tx.send(event.clone());
    }
}

#[tokio::test]
async fn test_client_receives_server_events() {
    let mut server = start_test_server(Behavior::Stream, vec![comment("c1")]).await;
    let client =
        RealtimeClient::new(ClientConfig::for_testing(&server.url).with_auth_token("secret"))
            .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe("doc-42", forward_to(tx));

    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within timeout")
        .unwrap();
    assert_eq!(event.event_type, "comment:new");
    assert_eq!(event.payload["id"], "c1");

    let auth = server.auth_headers.recv().await.unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer secret"));

    assert_eq!(client.state().status, ConnectionStatus::Connected);
    assert_eq!(client.metrics().successful_connections, 1);
    client.destroy();
}

#[tokio::test]
async fn test_client_reconnects_after_server_drop() {
    let server = start_test_server(Behavior::SendThenDrop, vec![comment("c1")]).await;
    let client = RealtimeClient::new(ClientConfig::for_testing(&server.url)).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe("doc-42", forward_to(tx));

    for _ in 0..2 {
        let event = timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        assert_eq!(event.payload["id"], "c1");
    }

    assert!(server.connections.load(Ordering::SeqCst) >= 2);
    assert!(client.metrics().successful_connections >= 2);
    client.destroy();
}

#[tokio::test]
async fn test_rejected_handshake_exhausts_retries() {
    let server = start_test_server(Behavior::Reject, vec![]).await;
    let config = ClientConfig {
        max_attempts: Some(2),
        ..ClientConfig::for_testing(&server.url).with_auth_token("expired")
    };
    let client = RealtimeClient::new(config).unwrap();
    let _sub = client.subscribe("doc-42", |_| {});

    timeout(Duration::from_secs(3), client.wait_for_phase(SupervisorPhase::Exhausted))
        .await
        .expect("client should give up");

    let state = client.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.error.as_deref().unwrap().contains("Unauthorized"));
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
    assert_eq!(client.metrics().failed_connections, 2);
}

#[tokio::test]
async fn test_unsubscribe_closes_socket() {
    let server = start_test_server(Behavior::Stream, vec![comment("c1")]).await;
    let client = RealtimeClient::new(ClientConfig::for_testing(&server.url)).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = client.subscribe("doc-42", forward_to(tx));
    timeout(Duration::from_secs(2), rx.recv()).await.unwrap();

    sub.unsubscribe();
    timeout(Duration::from_secs(2), client.wait_for_phase(SupervisorPhase::Idle))
        .await
        .expect("client should go idle");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}
