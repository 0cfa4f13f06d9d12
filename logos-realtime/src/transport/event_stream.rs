//! Server-Sent Events backend (reqwest + eventsource-stream).
//!
//! Each SSE `data:` block is one envelope. When the JSON omits `type`, a
//! non-default `event:` name is used instead, so servers that name events
//! out-of-band work unchanged.

use eventsource_stream::Eventsource;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::StatusCode;

use super::{ConnectRequest, FrameSink, Transport, TransportError};

/// SSE event name used when the server sends none.
const DEFAULT_EVENT_NAME: &str = "message";

/// SSE push transport.
#[derive(Debug, Clone, Default)]
pub struct EventStreamTransport {
    client: reqwest::Client,
}

impl EventStreamTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for EventStreamTransport {
    fn name(&self) -> &'static str {
        "sse"
    }

    fn run(&self, request: ConnectRequest, sink: FrameSink) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(run_stream(self.client.clone(), request, sink))
    }
}

async fn run_stream(
    client: reqwest::Client,
    request: ConnectRequest,
    sink: FrameSink,
) -> Result<(), TransportError> {
    let mut http = client
        .get(&request.url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if let Some(token) = &request.auth_token {
        http = http.bearer_auth(token);
    }

    let response = http.send().await.map_err(map_request_error)?;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::Unauthorized(status.as_u16()));
    }
    if !status.is_success() {
        return Err(TransportError::Http(status.as_u16()));
    }

    log::debug!("Session {}: event stream open at {}", sink.session_id(), request.url);
    sink.opened();

    let mut events = response.bytes_stream().eventsource();
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                if event.data.is_empty() {
                    continue;
                }
                let named = (event.event != DEFAULT_EVENT_NAME && !event.event.is_empty())
                    .then_some(event.event.as_str());
                sink.frame(&event.data, named);
            }
            Err(e) => return Err(TransportError::Network(e.to_string())),
        }
    }

    Err(TransportError::Closed("event stream ended".into()))
}

fn map_request_error(error: reqwest::Error) -> TransportError {
    if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(error.to_string())
    }
}
