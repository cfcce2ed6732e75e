//! MCP streamable HTTP: JSON-RPC POSTs answered with JSON or an SSE stream,
//! plus a GET event stream for server-initiated notifications.

use super::{
    encode_notification, encode_request, route_server_value, NotificationSender, PeerTransport,
};
use crate::core::config::PeerConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use rust_mcp_schema::schema_utils::{
    ClientMessage, NotificationFromClient, RequestFromClient, ServerMessage,
};
use rust_mcp_schema::LATEST_PROTOCOL_VERSION;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_HEADER: &str = "mcp-session-id";
const MCP_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut consumed = 0;

        while let Some(relative_pos) = memchr(b'\n', &self.buffer[consumed..]) {
            let line_end = consumed + relative_pos;
            push_trimmed(&mut lines, &self.buffer[consumed..line_end]);
            consumed = line_end + 1;
        }

        if flush {
            push_trimmed(&mut lines, &self.buffer[consumed..]);
            self.buffer.clear();
        } else if consumed > 0 {
            self.buffer.drain(..consumed);
        }

        lines
    }
}

fn push_trimmed(lines: &mut Vec<String>, bytes: &[u8]) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

pub fn require_http_base_url(config: &PeerConfig) -> Result<String, String> {
    config
        .base_url
        .clone()
        .ok_or_else(|| "MCP base_url is required for HTTP transports.".to_string())
}

fn build_mcp_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(MCP_HTTP_CONNECT_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| err.to_string())
}

pub fn apply_streamable_http_client_post_headers(
    request: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    request
        .header("Content-Type", MCP_JSON_CONTENT_TYPE)
        .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
}

pub fn apply_streamable_http_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    match protocol_version {
        Some(protocol_version) if !protocol_version.trim().is_empty() => {
            request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
        }
        _ => request,
    }
}

pub struct StreamableHttpTransport {
    peer_id: String,
    base_url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
    request_timeout: Duration,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<String>,
    next_request_id: AtomicI64,
    notifications: NotificationSender,
    listener: CancellationToken,
}

impl StreamableHttpTransport {
    pub fn new(config: &PeerConfig, notifications: NotificationSender) -> Result<Self, String> {
        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .flatten()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.sort();
        Ok(Self {
            peer_id: config.id.clone(),
            base_url: require_http_base_url(config)?,
            headers,
            client: build_mcp_http_client()?,
            request_timeout: Duration::from_secs(config.request_timeout_secs()),
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(
                config
                    .protocol_version
                    .clone()
                    .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string()),
            ),
            next_request_id: AtomicI64::new(0),
            notifications,
            listener: CancellationToken::new(),
        })
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn apply_common_headers(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        let protocol_version = self.protocol_version.read().await.clone();
        request = apply_streamable_http_protocol_version_header(
            request,
            Some(protocol_version.as_str()),
        );
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(session_id) = self.session_id.read().await.as_ref() {
            request = request.header(MCP_SESSION_HEADER, session_id);
        }
        request
    }

    async fn post(&self, message: &ClientMessage) -> Result<reqwest::Response, String> {
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        debug!(peer_id = %self.peer_id, url = %self.base_url, "Sending MCP HTTP request");
        let request = apply_streamable_http_client_post_headers(self.client.post(&self.base_url))
            .timeout(self.request_timeout)
            .body(payload);
        let response = self
            .apply_common_headers(request)
            .await
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }
        Ok(response)
    }

    /// Reads SSE frames until the first response or error, forwarding
    /// notifications that arrive ahead of it.
    async fn next_sse_server_message(
        &self,
        response: reqwest::Response,
    ) -> Result<ServerMessage, String> {
        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| err.to_string())?;
            for line in buffer.push(&chunk) {
                if let Some(message) = self.decode_sse_line(&line)? {
                    return Ok(message);
                }
            }
        }
        for line in buffer.finish() {
            if let Some(message) = self.decode_sse_line(&line)? {
                return Ok(message);
            }
        }

        Err("Empty event-stream response.".to_string())
    }

    fn decode_sse_line(&self, line: &str) -> Result<Option<ServerMessage>, String> {
        let Some(payload) = sse_data_payload(line) else {
            return Ok(None);
        };
        if payload.is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str::<Value>(payload).map_err(|err| err.to_string())?;
        Ok(
            route_server_value(&self.peer_id, value, &self.notifications).filter(|message| {
                matches!(
                    message,
                    ServerMessage::Response(_) | ServerMessage::Error(_)
                )
            }),
        )
    }

    async fn spawn_listener(&self) {
        let request = self
            .apply_common_headers(
                self.client
                    .get(&self.base_url)
                    .header("Accept", "text/event-stream"),
            )
            .await;
        let peer_id = self.peer_id.clone();
        let notifications = self.notifications.clone();
        let cancel = self.listener.clone();

        tokio::spawn(async move {
            let listen = async {
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(err) => {
                        debug!(peer_id = %peer_id, error = %err, "MCP event stream unavailable");
                        return;
                    }
                };
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                if !response.status().is_success() || !is_event_stream_content_type(&content_type)
                {
                    debug!(
                        peer_id = %peer_id,
                        status = %response.status(),
                        "MCP peer offers no event stream"
                    );
                    return;
                }

                let mut stream = response.bytes_stream();
                let mut buffer = SseLineBuffer::default();
                let forward = |line: &str| {
                    let Some(payload) = sse_data_payload(line) else {
                        return;
                    };
                    if let Ok(value) = serde_json::from_str::<Value>(payload) {
                        let _ = route_server_value(&peer_id, value, &notifications);
                    }
                };
                while let Some(Ok(chunk)) = stream.next().await {
                    for line in buffer.push(&chunk) {
                        forward(&line);
                    }
                }
                for line in buffer.finish() {
                    forward(&line);
                }
                debug!(peer_id = %peer_id, "MCP event stream closed");
            };

            tokio::select! {
                _ = listen => {}
                _ = cancel.cancelled() => {}
            }
        });
    }
}

#[async_trait]
impl PeerTransport for StreamableHttpTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let message = encode_request(request_id, request)?;
        let response = self.post(&message).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if is_event_stream_content_type(&content_type) {
            self.next_sse_server_message(response).await
        } else {
            let body = response.bytes().await.map_err(|err| err.to_string())?;
            serde_json::from_slice::<ServerMessage>(&body).map_err(|err| err.to_string())
        }
    }

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), String> {
        let message = encode_notification(notification)?;
        self.post(&message).await.map(|_| ())
    }

    async fn on_initialized(&self, protocol_version: &str) -> Result<(), String> {
        if !protocol_version.trim().is_empty() {
            *self.protocol_version.write().await = protocol_version.to_string();
        }
        self.spawn_listener().await;
        Ok(())
    }

    async fn close(&self) {
        self.listener.cancel();
    }
}

impl Drop for StreamableHttpTransport {
    fn drop(&mut self) {
        self.listener.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_buffer_handles_partial_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: one").is_empty());
        assert_eq!(buffer.push(b"\r\n\r\n"), vec!["data: one"]);
        assert_eq!(buffer.push(b"data: t"), Vec::<String>::new());
        assert_eq!(buffer.push(b"wo\n"), vec!["data: two"]);
        assert_eq!(buffer.push(b"data: tail"), Vec::<String>::new());
        assert_eq!(buffer.finish(), vec!["data: tail"]);
    }

    #[test]
    fn detects_event_stream_content_type() {
        assert!(is_event_stream_content_type(
            "Text/Event-Stream; Charset=UTF-8"
        ));
        assert!(!is_event_stream_content_type("application/json"));
    }

    #[test]
    fn extracts_sse_payload() {
        assert_eq!(sse_data_payload("data: {\"id\":1}"), Some("{\"id\":1}"));
        assert_eq!(sse_data_payload("event: ping"), None);
    }

    #[test]
    fn protocol_header_ignored_when_blank() {
        let client = reqwest::Client::new();
        let req = apply_streamable_http_protocol_version_header(
            client.post("https://example.com"),
            Some("  "),
        )
        .build()
        .expect("request should build");
        assert!(req.headers().get(MCP_PROTOCOL_VERSION_HEADER).is_none());
    }

    #[test]
    fn http_transport_requires_base_url() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let config = PeerConfig {
            id: "remote".to_string(),
            ..PeerConfig::default()
        };
        let err = StreamableHttpTransport::new(&config, tx)
            .err()
            .expect("base_url is required");
        assert_eq!(err, "MCP base_url is required for HTTP transports.");
    }
}
