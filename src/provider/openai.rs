//! Adapter for the "delta + explicit tool-call event" provider family
//! (OpenAI and every OpenAI-compatible endpoint).
//!
//! Tool-call arguments arrive as indexed string fragments interleaved with
//! text deltas; they are accumulated here and surfaced as one canonical
//! tool-call event only once the provider signals the end of generation.

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChatStreamChunk, ChatToolCallDelta};
use crate::core::announce::strip_messages;
use crate::core::error::GatewayError;
use crate::core::event::{event_channel, EventSender, EventStream, FinishReason, StreamEvent, Usage};
use crate::provider::ProviderRequest;
use crate::utils::sse::{sse_data_payload, SseLineBuffer};
use crate::utils::url::construct_api_url;

#[derive(Clone)]
pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulated per-stream state: tool-call fragments keyed by index, plus
/// the finish reason and usage that may arrive on separate chunks.
#[derive(Default)]
struct StreamState {
    tool_calls: Vec<ToolCallBuilder>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    pub fn open_stream(&self, request: ProviderRequest, cancel: CancellationToken) -> EventStream {
        let (tx, rx) = event_channel();
        let adapter = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = adapter.run_stream(request, &tx) => {}
                _ = cancel.cancelled() => {}
            }
        });
        rx
    }

    async fn run_stream(&self, request: ProviderRequest, tx: &EventSender) {
        let body = build_request_body(&request);
        let url = construct_api_url(&self.base_url, "chat/completions");
        debug!(model = %request.model, url = %url, "Opening OpenAI-family stream");

        let response = match self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let _ = tx.send(Err(GatewayError::Transport(err.to_string()))).await;
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            let _ = tx
                .send(Err(GatewayError::Transport(format!(
                    "Provider returned {}: {}",
                    status, body
                ))))
                .await;
            return;
        }

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();
        let mut state = StreamState::default();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = tx.send(Err(GatewayError::Transport(err.to_string()))).await;
                    return;
                }
            };
            for line in buffer.push(&chunk) {
                match process_sse_line(&line, &mut state) {
                    LineOutcome::Ignored => {}
                    LineOutcome::Events(events) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    LineOutcome::Done => {
                        emit_final_events(state, tx).await;
                        return;
                    }
                    LineOutcome::Failed(message) => {
                        let _ = tx.send(Err(GatewayError::Transport(message))).await;
                        return;
                    }
                }
            }
        }

        // Stream ended without [DONE]; still flush what the provider sent.
        emit_final_events(state, tx).await;
    }
}

enum LineOutcome {
    Ignored,
    Events(Vec<StreamEvent>),
    Done,
    Failed(String),
}

fn process_sse_line(line: &str, state: &mut StreamState) -> LineOutcome {
    let Some(payload) = sse_data_payload(line) else {
        return LineOutcome::Ignored;
    };
    if payload == "[DONE]" {
        return LineOutcome::Done;
    }

    match serde_json::from_str::<ChatStreamChunk>(payload) {
        Ok(chunk) => {
            let mut events = Vec::new();
            if let Some(usage) = chunk.usage {
                state.usage = Some(usage);
            }
            if let Some(choice) = chunk.choices.first() {
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() {
                        events.push(StreamEvent::TextDelta {
                            text: content.clone(),
                        });
                    }
                }
                if let Some(deltas) = &choice.delta.tool_calls {
                    for delta in deltas {
                        accumulate_tool_call(state, delta);
                    }
                }
                if let Some(reason) = &choice.finish_reason {
                    state.finish_reason = Some(reason.clone());
                }
            }
            LineOutcome::Events(events)
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return LineOutcome::Ignored;
            }
            // Providers report in-stream failures as a JSON error payload.
            LineOutcome::Failed(extract_error_message(payload))
        }
    }
}

fn accumulate_tool_call(state: &mut StreamState, delta: &ChatToolCallDelta) {
    let index = delta.index.unwrap_or(0) as usize;
    while state.tool_calls.len() <= index {
        state.tool_calls.push(ToolCallBuilder::default());
    }
    let builder = &mut state.tool_calls[index];
    if let Some(id) = &delta.id {
        builder.id.push_str(id);
    }
    if let Some(function) = &delta.function {
        if let Some(name) = &function.name {
            builder.name.push_str(name);
        }
        if let Some(arguments) = &function.arguments {
            builder.arguments.push_str(arguments);
        }
    }
}

/// Flushes buffered tool calls (arguments are complete by now) followed by
/// the terminal finish event.
async fn emit_final_events(state: StreamState, tx: &EventSender) {
    let has_tool_calls = state.tool_calls.iter().any(|call| !call.name.is_empty());

    for call in &state.tool_calls {
        if call.name.is_empty() {
            continue;
        }
        let arguments: Value = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(value) => value,
                Err(err) => {
                    let _ = tx
                        .send(Err(GatewayError::Transport(format!(
                            "Provider sent malformed tool-call arguments for '{}': {}",
                            call.name, err
                        ))))
                        .await;
                    return;
                }
            }
        };
        if tx
            .send(Ok(StreamEvent::ToolCallRequest {
                id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments,
            }))
            .await
            .is_err()
        {
            return;
        }
    }

    let reason = match state.finish_reason.as_deref() {
        Some(reason) => FinishReason::from_openai(reason),
        None if has_tool_calls => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };
    let _ = tx
        .send(Ok(StreamEvent::Finish {
            reason,
            usage: state.usage.unwrap_or_default(),
        }))
        .await;
}

fn build_request_body(request: &ProviderRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": strip_messages(&request.messages),
        "stream": true,
        "stream_options": {"include_usage": true},
    });
    if request
        .tool_schema
        .as_array()
        .is_some_and(|tools| !tools.is_empty())
    {
        body["tools"] = request.tool_schema.clone();
    }
    if let Some(object) = body.as_object_mut() {
        for (key, value) in &request.extra_args {
            object.insert(key.clone(), value.clone());
        }
    }
    body
}

fn extract_error_message(payload: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        if let Some(message) = value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| value.get("error").and_then(Value::as_str))
            .or_else(|| value.get("message").and_then(Value::as_str))
        {
            return message.to_string();
        }
    }
    payload.to_string()
}
