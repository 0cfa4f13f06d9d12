//! WebSocket backend (tokio-tungstenite).
//!
//! The credential rides on the upgrade request as `Authorization: Bearer`.
//! Text frames carry envelopes; binary frames are accepted when they hold
//! UTF-8. Ping/pong is answered by tungstenite itself.

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{ConnectRequest, FrameSink, Transport, TransportError};

/// WebSocket push transport.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn run(&self, request: ConnectRequest, sink: FrameSink) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(run_socket(request, sink))
    }
}

async fn run_socket(request: ConnectRequest, sink: FrameSink) -> Result<(), TransportError> {
    let mut upgrade = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

    if let Some(token) = &request.auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| TransportError::InvalidRequest("auth token is not a valid header value".into()))?;
        upgrade.headers_mut().insert(AUTHORIZATION, value);
    }

    let (mut socket, _response) = tokio_tungstenite::connect_async(upgrade)
        .await
        .map_err(map_handshake_error)?;

    log::debug!("Session {}: WebSocket connected to {}", sink.session_id(), request.url);
    sink.opened();

    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Text(text)) => sink.frame(text.as_str(), None),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => sink.frame(text, None),
                Err(_) => sink.reject("binary frame is not UTF-8"),
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "closed by server".to_string());
                return Err(TransportError::Closed(reason.trim().to_string()));
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Network(e.to_string())),
        }
    }

    Err(TransportError::Closed("stream ended".into()))
}

fn map_handshake_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TransportError::Unauthorized(status)
            } else {
                TransportError::Http(status)
            }
        }
        WsError::Url(e) => TransportError::InvalidRequest(e.to_string()),
        other => TransportError::Network(other.to_string()),
    }
}
