//! MCP transport over a locally spawned subprocess.
//!
//! Requests are written to the child's stdin as line-delimited JSON-RPC; a
//! reader task routes responses back through a pending-request map keyed by
//! request id. Server-initiated requests are outside this gateway's
//! contract and are dropped with a debug log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{InitializeResult, RequestId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Duration;
use tracing::debug;

use crate::core::config::McpServerConfig;
use crate::mcp::protocol::parse_initialize_result;
use crate::mcp::transport::McpTransport;

const STDIO_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const STDIO_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub struct StdioTransport {
    server_id: String,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_request_id: AtomicI64,
}

impl StdioTransport {
    pub async fn spawn(server_id: &str, config: &McpServerConfig) -> Result<Self, String> {
        let command = config
            .command
            .clone()
            .ok_or_else(|| "MCP command is required for stdio transport.".to_string())?;
        let args = config.args.clone().unwrap_or_default();
        debug!(server_id = %server_id, command = %command, args = ?args, "Starting MCP stdio server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = config.env.clone() {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|err| err.to_string())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        spawn_stdout_reader(pending.clone(), stdout, server_id.to_string());
        spawn_stderr_drain(stderr);

        let reaper_pending = pending.clone();
        tokio::spawn(async move {
            let _ = child.wait().await;
            reaper_pending.lock().await.clear();
        });

        Ok(Self {
            server_id: server_id.to_string(),
            stdin: Mutex::new(stdin),
            pending,
            next_request_id: AtomicI64::new(0),
        })
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_payload(&self, payload: &str) -> Result<(), String> {
        let mut stdin = match tokio::time::timeout(STDIO_WRITE_TIMEOUT, self.stdin.lock()).await {
            Ok(stdin) => stdin,
            Err(_) => return Err("Timed out waiting for MCP stdio stdin lock.".to_string()),
        };
        tokio::time::timeout(STDIO_WRITE_TIMEOUT, stdin.write_all(payload.as_bytes()))
            .await
            .map_err(|_| "Timed out writing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(STDIO_WRITE_TIMEOUT, stdin.write_all(b"\n"))
            .await
            .map_err(|_| "Timed out writing MCP stdio request newline.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(STDIO_WRITE_TIMEOUT, stdin.flush())
            .await
            .map_err(|_| "Timed out flushing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message =
            ClientMessage::from_message(MessageFromClient::NotificationFromClient(notification), None)
                .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        self.write_payload(&payload).await
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn initialize(&self, config: &McpServerConfig) -> Result<InitializeResult, String> {
        let details = crate::mcp::protocol::client_details_for(config);
        let response = self
            .request(RequestFromClient::InitializeRequest(details))
            .await?;
        let result = parse_initialize_result(response)?;
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await?;
        Ok(result)
    }

    async fn request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        debug!(server_id = %self.server_id, request_id = ?request_id, "Sending MCP stdio request");
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        if let Err(err) = self.write_payload(&payload).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(STDIO_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err("MCP stdio response channel closed.".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err("MCP stdio request timed out.".to_string())
            }
        }
    }
}

fn spawn_stdout_reader(pending: PendingMap, stdout: tokio::process::ChildStdout, server_id: String) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            let value = match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if let Some(items) = value.as_array() {
                for item in items {
                    if let Ok(message) = serde_json::from_value::<ServerMessage>(item.clone()) {
                        dispatch_message(&pending, message, &server_id).await;
                    }
                }
            } else if let Ok(message) = serde_json::from_value::<ServerMessage>(value) {
                dispatch_message(&pending, message, &server_id).await;
            }
        }
    });
}

fn spawn_stderr_drain(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(_)) = reader.next_line().await {}
    });
}

async fn dispatch_message(pending: &PendingMap, message: ServerMessage, server_id: &str) {
    match &message {
        ServerMessage::Response(response) => {
            if let Some(tx) = pending.lock().await.remove(&response.id) {
                let _ = tx.send(message);
            }
        }
        ServerMessage::Error(error) => {
            if let Some(id) = error.id.as_ref() {
                if let Some(tx) = pending.lock().await.remove(id) {
                    let _ = tx.send(message);
                }
            }
        }
        ServerMessage::Request(request) => {
            debug!(
                server_id = %server_id,
                method = %request.method(),
                "Dropping unsupported MCP server-initiated request"
            );
        }
        ServerMessage::Notification(_) => {
            debug!(server_id = %server_id, "Ignoring MCP stdio notification");
        }
    }
}
