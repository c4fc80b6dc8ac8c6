//! The tool-call orchestration loop.
//!
//! One request is one run of this state machine: stream the provider,
//! forward text untouched, and when the turn ends in a tool request,
//! resolve it (announce, execute, present), append the assistant tool-call
//! message plus a synthetic tool-result message, and reopen the provider
//! with the augmented history. The loop is depth-first with one
//! outstanding provider call at a time and is bounded by `max_steps`
//! provider rounds.

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ChatMessage, ChatToolCall};
use crate::core::announce;
use crate::core::error::GatewayError;
use crate::core::event::{event_channel, EventSender, EventStream, FinishReason, StreamEvent, Usage};
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::tools::ToolSet;

pub struct ToolLoopParams {
    pub adapter: ProviderAdapter,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: ToolSet,
    pub extra_args: Map<String, Value>,
    pub max_steps: usize,
}

struct PendingCall {
    id: String,
    tool_name: String,
    arguments: Value,
}

/// Spawns the loop and hands back its canonical event stream. Dropping the
/// stream (client disconnect) stops the loop at its next send, which in
/// turn cancels the live provider stream.
pub fn spawn_tool_loop(params: ToolLoopParams) -> EventStream {
    let (tx, rx) = event_channel();
    tokio::spawn(run_loop(params, tx));
    rx
}

async fn run_loop(params: ToolLoopParams, tx: EventSender) {
    let ToolLoopParams {
        adapter,
        model,
        mut messages,
        tools,
        extra_args,
        max_steps,
    } = params;

    let schema = tools.schema(adapter.schema_shape());
    let cancel = CancellationToken::new();
    let _provider_guard = cancel.clone().drop_guard();

    // A zero budget would end the stream before the first provider call.
    let max_steps = max_steps.max(1);

    for step in 1..=max_steps {
        let request = ProviderRequest {
            model: model.clone(),
            messages: messages.clone(),
            tool_schema: schema.clone(),
            extra_args: extra_args.clone(),
        };
        let mut stream = adapter.open_stream(request, cancel.child_token());

        let mut round_text = String::new();
        let mut pending: Option<PendingCall> = None;
        let mut finish: Option<(FinishReason, Usage)> = None;

        while let Some(item) = stream.recv().await {
            match item {
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
                Ok(StreamEvent::TextDelta { text }) => {
                    round_text.push_str(&text);
                    if tx.send(Ok(StreamEvent::TextDelta { text })).await.is_err() {
                        return;
                    }
                }
                Ok(StreamEvent::ToolCallRequest {
                    id,
                    tool_name,
                    arguments,
                }) => {
                    // Concurrent multi-tool turns are unsupported; the most
                    // recently completed call wins.
                    if let Some(dropped) = pending.replace(PendingCall {
                        id,
                        tool_name,
                        arguments,
                    }) {
                        debug!(
                            dropped = %dropped.tool_name,
                            "Multiple tool calls in one turn; keeping the most recent"
                        );
                    }
                }
                Ok(StreamEvent::Finish { reason, usage }) => {
                    finish = Some((reason, usage));
                }
                Ok(other) => {
                    if tx.send(Ok(other)).await.is_err() {
                        return;
                    }
                }
            }
        }

        let Some((reason, usage)) = finish else {
            let _ = tx
                .send(Err(GatewayError::Transport(
                    "Provider stream ended without a finish event".to_string(),
                )))
                .await;
            return;
        };

        let call = match pending {
            Some(call) if reason == FinishReason::ToolCalls => call,
            _ => {
                // A tool-flavored finish with no buffered call has nothing
                // to resolve; report it as an ordinary stop.
                let reason = if reason == FinishReason::ToolCalls {
                    FinishReason::Stop
                } else {
                    reason
                };
                let _ = tx.send(Ok(StreamEvent::Finish { reason, usage })).await;
                return;
            }
        };

        if step == max_steps {
            debug!(step, tool = %call.tool_name, "Step budget exhausted; ending without resolving");
            let _ = tx
                .send(Ok(StreamEvent::Finish {
                    reason: FinishReason::Stop,
                    usage,
                }))
                .await;
            return;
        }

        let Some(tool) = tools.get(&call.tool_name).cloned() else {
            let _ = tx
                .send(Err(GatewayError::UnresolvedTool {
                    tool: call.tool_name,
                }))
                .await;
            return;
        };

        let argument_map = call.arguments.as_object().cloned().unwrap_or_default();

        if let Some(narration) = tool.announce(&argument_map) {
            let framed = announce::encode(&narration);
            if tx.send(Ok(StreamEvent::TextDelta { text: framed })).await.is_err() {
                return;
            }
        }

        if tx
            .send(Ok(StreamEvent::ToolCallRequest {
                id: call.id.clone(),
                tool_name: tool.name().to_string(),
                arguments: call.arguments.clone(),
            }))
            .await
            .is_err()
        {
            return;
        }

        let result_value = match tool.execute(&argument_map).await {
            Ok(value) => value,
            Err(message) => {
                // Tool failures become the tool's answer so the model can
                // react instead of the exchange aborting.
                warn!(tool = %tool.name(), error = %message, "Tool execution failed");
                json!({"error": message})
            }
        };
        let result_content = result_value.to_string();

        if tx
            .send(Ok(StreamEvent::ToolCallResult {
                id: call.id.clone(),
                content: result_content.clone(),
            }))
            .await
            .is_err()
        {
            return;
        }

        if let Some(narration) = tool.present(&result_value, &argument_map) {
            let framed = announce::encode(&narration);
            if tx.send(Ok(StreamEvent::TextDelta { text: framed })).await.is_err() {
                return;
            }
        }

        messages.push(ChatMessage::assistant_tool_call(
            &round_text,
            ChatToolCall::function(&call.id, tool.name(), &call.arguments),
        ));
        messages.push(ChatMessage::tool_result(&call.id, result_content));
        debug!(step, tool = %tool.name(), "Reopening provider stream with tool result");
    }
}
