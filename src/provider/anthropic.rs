//! Adapter for the content-block provider family (Anthropic Messages API).
//!
//! Tool-call detection requires buffering content blocks: `tool_use` input
//! arrives as partial JSON fragments and only the `message_stop` signal
//! reveals whether the turn ended in a tool request.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ChatMessage;
use crate::core::announce::strip_messages;
use crate::core::error::GatewayError;
use crate::core::event::{event_channel, EventSender, EventStream, FinishReason, StreamEvent, Usage};
use crate::provider::ProviderRequest;
use crate::utils::sse::{sse_data_payload, SseLineBuffer};
use crate::utils::url::construct_api_url;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        content_block: BlockStart,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: WireError,
    },
}

#[derive(Deserialize, Debug)]
struct MessageStart {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    Text {},
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
struct WireError {
    #[serde(default)]
    message: String,
}

enum Block {
    Text,
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
    Other,
}

/// Buffered blocks plus finish metadata; resolved at `message_stop`.
#[derive(Default)]
struct StreamState {
    blocks: Vec<Block>,
    stop_reason: Option<String>,
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicAdapter {
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
        let url = construct_api_url(&self.base_url, "v1/messages");
        debug!(model = %request.model, url = %url, "Opening Anthropic stream");

        let response = match self
            .client
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
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
    let event = match serde_json::from_str::<WireEvent>(payload) {
        Ok(event) => event,
        Err(_) => return LineOutcome::Ignored,
    };

    match event {
        WireEvent::MessageStart { message } => {
            if let Some(usage) = message.usage {
                state.input_tokens = usage.input_tokens;
                state.output_tokens = usage.output_tokens;
            }
            LineOutcome::Ignored
        }
        WireEvent::ContentBlockStart { content_block } => {
            state.blocks.push(match content_block {
                BlockStart::Text {} => Block::Text,
                BlockStart::ToolUse { id, name } => Block::ToolUse {
                    id,
                    name,
                    input_json: String::new(),
                },
                BlockStart::Other => Block::Other,
            });
            LineOutcome::Ignored
        }
        WireEvent::ContentBlockDelta { delta } => match delta {
            BlockDelta::TextDelta { text } => LineOutcome::Events(vec![StreamEvent::TextDelta {
                text,
            }]),
            BlockDelta::InputJsonDelta { partial_json } => {
                if let Some(Block::ToolUse { input_json, .. }) = state.blocks.last_mut() {
                    input_json.push_str(&partial_json);
                }
                LineOutcome::Ignored
            }
            BlockDelta::Other => LineOutcome::Ignored,
        },
        WireEvent::ContentBlockStop {} => LineOutcome::Ignored,
        WireEvent::MessageDelta { delta, usage } => {
            if let Some(reason) = delta.stop_reason {
                state.stop_reason = Some(reason);
            }
            if let Some(usage) = usage {
                state.output_tokens = usage.output_tokens;
            }
            LineOutcome::Ignored
        }
        WireEvent::MessageStop => LineOutcome::Done,
        WireEvent::Ping => LineOutcome::Ignored,
        WireEvent::Error { error } => LineOutcome::Failed(error.message),
    }
}

/// The most recently completed block decides whether the turn requested a
/// tool; text blocks already streamed out as deltas.
async fn emit_final_events(state: StreamState, tx: &EventSender) {
    let usage = Usage {
        prompt_tokens: state.input_tokens,
        completion_tokens: state.output_tokens,
        total_tokens: state.input_tokens + state.output_tokens,
    };

    if let Some(Block::ToolUse {
        id,
        name,
        input_json,
    }) = state.blocks.last()
    {
        let arguments: Value = if input_json.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(input_json) {
                Ok(value) => value,
                Err(err) => {
                    let _ = tx
                        .send(Err(GatewayError::Transport(format!(
                            "Provider sent malformed tool input for '{}': {}",
                            name, err
                        ))))
                        .await;
                    return;
                }
            }
        };
        if tx
            .send(Ok(StreamEvent::ToolCallRequest {
                id: id.clone(),
                tool_name: name.clone(),
                arguments,
            }))
            .await
            .is_err()
        {
            return;
        }
        let _ = tx
            .send(Ok(StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                usage,
            }))
            .await;
        return;
    }

    let reason = state
        .stop_reason
        .as_deref()
        .map(FinishReason::from_anthropic)
        .unwrap_or(FinishReason::Stop);
    let _ = tx.send(Ok(StreamEvent::Finish { reason, usage })).await;
}

fn build_request_body(request: &ProviderRequest) -> Value {
    let stripped = strip_messages(&request.messages);
    let (system, messages) = convert_messages(&stripped);

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "max_tokens": DEFAULT_MAX_TOKENS,
    });
    if let Some(system) = system {
        body["system"] = Value::String(system);
    }
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

/// Rewrites the OpenAI-idiom history into Messages API form: system turns
/// lift into the top-level `system` parameter, assistant tool calls become
/// `tool_use` blocks, and tool results travel as `tool_result` blocks
/// inside user turns.
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut converted = Vec::new();

    for message in messages {
        match message.role.as_str() {
            "system" => system_parts.push(message.content_text()),
            "tool" => {
                let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
                converted.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": message.content_text(),
                    }],
                }));
            }
            "assistant" if message.tool_calls.is_some() => {
                let mut blocks = Vec::new();
                let text = message.content_text();
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in message.tool_calls.as_deref().unwrap_or_default() {
                    let input: Value = serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": input,
                    }));
                }
                converted.push(json!({"role": "assistant", "content": blocks}));
            }
            _ => converted.push(json!({
                "role": message.role,
                "content": message.content,
            })),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatToolCall;
    use serde_json::Map;

    fn drain_events(lines: &[&str]) -> (Vec<StreamEvent>, StreamState, bool) {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        let mut done = false;
        for line in lines {
            match process_sse_line(line, &mut state) {
                LineOutcome::Events(batch) => events.extend(batch),
                LineOutcome::Done => {
                    done = true;
                    break;
                }
                LineOutcome::Ignored => {}
                LineOutcome::Failed(message) => panic!("unexpected failure: {message}"),
            }
        }
        (events, state, done)
    }

    #[test]
    fn text_blocks_stream_as_deltas() {
        let (events, state, done) = drain_events(&[
            r#"data: {"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":0}}}"#,
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]);

        assert!(done);
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta {
                text: "Hi".to_string()
            }]
        );
        assert_eq!(state.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(state.input_tokens, 12);
        assert_eq!(state.output_tokens, 4);
    }

    #[tokio::test]
    async fn trailing_tool_use_block_becomes_tool_call() {
        let (_, state, done) = drain_events(&[
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me check."}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search_google"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"foo\"}"}}"#,
            r#"data: {"type":"content_block_stop","index":1}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]);
        assert!(done);

        let (tx, mut rx) = event_channel();
        emit_final_events(state, &tx).await;
        drop(tx);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(
            first,
            StreamEvent::ToolCallRequest {
                id: "toolu_1".to_string(),
                tool_name: "search_google".to_string(),
                arguments: json!({"q": "foo"}),
            }
        );
        let second = rx.recv().await.unwrap().unwrap();
        assert!(matches!(
            second,
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                ..
            }
        ));
    }

    #[test]
    fn error_events_are_terminal() {
        let mut state = StreamState::default();
        let outcome = process_sse_line(
            r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            &mut state,
        );
        match outcome {
            LineOutcome::Failed(message) => assert_eq!(message, "Overloaded"),
            _ => panic!("expected terminal failure"),
        }
    }

    #[test]
    fn converts_history_to_messages_api_form() {
        let call = ChatToolCall::function("call_1", "search_google", &json!({"q": "foo"}));
        let messages = vec![
            ChatMessage::text("system", "Be terse."),
            ChatMessage::text("user", "look this up"),
            ChatMessage::assistant_tool_call("Let me check.", call),
            ChatMessage::tool_result("call_1", "\"result text\""),
        ];

        let (system, converted) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("Be terse."));
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1]["content"][1]["type"], json!("tool_use"));
        assert_eq!(converted[1]["content"][1]["input"], json!({"q": "foo"}));
        assert_eq!(converted[2]["role"], json!("user"));
        assert_eq!(converted[2]["content"][0]["type"], json!("tool_result"));
        assert_eq!(
            converted[2]["content"][0]["tool_use_id"],
            json!("call_1")
        );
    }

    #[test]
    fn request_body_defaults_max_tokens_and_lifts_system() {
        let request = ProviderRequest {
            model: "claude-sonnet".to_string(),
            messages: vec![
                ChatMessage::text("system", "Be terse."),
                ChatMessage::text("user", "hi"),
            ],
            tool_schema: json!([{"name": "search_google"}]),
            extra_args: Map::new(),
        };

        let body = build_request_body(&request);
        assert_eq!(body["max_tokens"], json!(DEFAULT_MAX_TOKENS));
        assert_eq!(body["system"], json!("Be terse."));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["tools"][0]["name"], json!("search_google"));
    }
}
