//! MCP transport over streamable HTTP.
//!
//! Every JSON-RPC message is a POST to the server's base URL; the reply is
//! either a plain JSON body or a short-lived event stream whose first
//! response/error message answers the request. The server may assign a
//! session id on any response, which is echoed on subsequent requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{InitializeResult, RequestId};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::debug;

use crate::core::config::McpServerConfig;
use crate::mcp::protocol::{client_details_for, parse_initialize_result, requested_protocol_version};
use crate::mcp::transport::McpTransport;
use crate::utils::sse::{is_event_stream_content_type, sse_data_payload, SseLineBuffer};

const MCP_JSON_CONTENT_TYPE: &str = "application/json";
const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
const MCP_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MCP_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct StreamableHttpTransport {
    server_id: String,
    client: reqwest::Client,
    base_url: String,
    extra_headers: HashMap<String, String>,
    protocol_version: RwLock<String>,
    session_id: RwLock<Option<String>>,
    next_request_id: AtomicI64,
}

impl StreamableHttpTransport {
    pub fn new(server_id: &str, config: &McpServerConfig) -> Result<Self, String> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| "MCP base_url is required for HTTP transports.".to_string())?;
        let client = reqwest::Client::builder()
            .connect_timeout(MCP_HTTP_CONNECT_TIMEOUT)
            .timeout(MCP_HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| err.to_string())?;

        Ok(Self {
            server_id: server_id.to_string(),
            client,
            base_url,
            extra_headers: config.headers.clone().unwrap_or_default(),
            protocol_version: RwLock::new(requested_protocol_version(config)),
            session_id: RwLock::new(None),
            next_request_id: AtomicI64::new(0),
        })
    }

    async fn post_message(&self, message: &ClientMessage) -> Result<reqwest::Response, String> {
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        let protocol_version = self.protocol_version.read().await.clone();
        let mut request = self
            .client
            .post(&self.base_url)
            .header("Content-Type", MCP_JSON_CONTENT_TYPE)
            .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
            .header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
            .body(payload);

        for (name, value) in &self.extra_headers {
            request = request.header(name, value);
        }
        if let Some(session_id) = self.session_id.read().await.clone() {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
        {
            *self.session_id.write().await = Some(session_id);
        }

        Ok(response)
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message =
            ClientMessage::from_message(MessageFromClient::NotificationFromClient(notification), None)
                .map_err(|err| err.to_string())?;
        self.post_message(&message).await.map(|_| ())
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn initialize(&self, config: &McpServerConfig) -> Result<InitializeResult, String> {
        let details = client_details_for(config);
        let response = self
            .request(RequestFromClient::InitializeRequest(details))
            .await?;
        let result = parse_initialize_result(response)?;
        if !result.protocol_version.trim().is_empty() {
            *self.protocol_version.write().await = result.protocol_version.clone();
        }
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await?;
        Ok(result)
    }

    async fn request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        debug!(server_id = %self.server_id, url = %self.base_url, request_id = ?request_id, "Sending MCP HTTP request");
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id),
        )
        .map_err(|err| err.to_string())?;

        let response = self.post_message(&message).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if is_event_stream_content_type(&content_type) {
            next_sse_server_message(response).await
        } else {
            let body = response.bytes().await.map_err(|err| err.to_string())?;
            serde_json::from_slice::<ServerMessage>(&body).map_err(|err| err.to_string())
        }
    }
}

/// Reads an event-stream response until the first response/error message,
/// which answers the in-flight request. Anything else on the stream is
/// outside this gateway's contract and is skipped.
async fn next_sse_server_message(response: reqwest::Response) -> Result<ServerMessage, String> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| err.to_string())?;
        for line in buffer.push(&chunk) {
            if let Some(message) = decode_sse_line(&line)? {
                return Ok(message);
            }
        }
    }

    for line in buffer.finish() {
        if let Some(message) = decode_sse_line(&line)? {
            return Ok(message);
        }
    }

    Err("Empty event-stream response.".to_string())
}

fn decode_sse_line(line: &str) -> Result<Option<ServerMessage>, String> {
    let Some(payload) = sse_data_payload(line) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }

    let message = serde_json::from_str::<ServerMessage>(payload).map_err(|err| err.to_string())?;
    if matches!(
        message,
        ServerMessage::Response(_) | ServerMessage::Error(_)
    ) {
        Ok(Some(message))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_base_url() {
        let config = McpServerConfig::default();
        let err = StreamableHttpTransport::new("alpha", &config).unwrap_err();
        assert_eq!(err, "MCP base_url is required for HTTP transports.");
    }

    #[test]
    fn decode_skips_non_terminal_messages() {
        assert!(decode_sse_line("event: ping").unwrap().is_none());
        assert!(decode_sse_line("data:").unwrap().is_none());
        let response = decode_sse_line(
            r#"data: {"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#,
        )
        .unwrap();
        assert!(matches!(response, Some(ServerMessage::Response(_))));
    }
}
