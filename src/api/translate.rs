//! Response translation: canonical stream events to the OpenAI
//! chat-completions wire format.
//!
//! Streaming mode emits `chat.completion.chunk` SSE frames plus
//! `event: tool-call` / `event: tool-result` frames for clients that
//! understand them; OpenAI-only consumers skip unknown event types. The
//! stream is terminated by the literal `data: [DONE]` frame, except after a
//! mid-stream failure, which ends with an error frame instead.

use actix_web::web::Bytes;
use futures_util::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::announce;
use crate::core::error::GatewayError;
use crate::core::event::{EventStream, StreamEvent, EVENT_CHANNEL_CAPACITY};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

pub fn data_frame(chunk: &Value) -> String {
    format!("data: {}\n\n", chunk)
}

pub fn event_frame(event: &str, chunk: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, chunk)
}

fn initial_chunk(model: &str, created: i64) -> Value {
    json!({
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "finish_reason": null,
            "delta": {"role": "assistant", "content": ""},
        }],
    })
}

fn frame_for_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::TextDelta { text } => data_frame(&json!({
            "object": "chat.completion.chunk",
            "choices": [{
                "index": 0,
                "delta": {"content": text},
            }],
        })),
        StreamEvent::ToolCallRequest {
            id,
            tool_name,
            arguments,
        } => event_frame(
            "tool-call",
            &json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": tool_name,
                    "arguments": arguments.to_string(),
                },
            }),
        ),
        StreamEvent::ToolCallResult { id, content } => event_frame(
            "tool-result",
            &json!({
                "tool_call_id": id,
                "content": content,
            }),
        ),
        StreamEvent::Finish { reason, usage } => data_frame(&json!({
            "object": "chat.completion.chunk",
            "usage": {
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "total_tokens": usage.total_tokens,
            },
            "choices": [{
                "index": 0,
                "finish_reason": reason.as_str(),
            }],
        })),
    }
}

fn error_frame(error: &GatewayError) -> String {
    data_frame(&json!({
        "error": {"message": error.to_string()},
    }))
}

/// Translates the canonical event stream into SSE frames. Dropping the
/// returned stream (client disconnect) propagates upward and tears down
/// the live provider stream.
pub fn sse_stream(mut events: EventStream, model: String) -> impl Stream<Item = Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(EVENT_CHANNEL_CAPACITY);
    let created = chrono::Utc::now().timestamp();

    tokio::spawn(async move {
        if tx
            .send(Bytes::from(data_frame(&initial_chunk(&model, created))))
            .await
            .is_err()
        {
            return;
        }

        while let Some(item) = events.recv().await {
            let frame = match &item {
                Ok(event) => frame_for_event(event),
                Err(error) => {
                    let _ = tx.send(Bytes::from(error_frame(error))).await;
                    return;
                }
            };
            if tx.send(Bytes::from(frame)).await.is_err() {
                return;
            }
        }

        let _ = tx.send(Bytes::from(DONE_FRAME)).await;
    });

    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|bytes| (bytes, rx))
    })
}

/// Non-streaming mode: consumes the whole sequence and returns one
/// `chat.completion` object. Usage comes from the final finish event;
/// announcement narration is an output-side overlay and is stripped from
/// the aggregated text.
pub async fn collect_completion(
    mut events: EventStream,
    model: &str,
) -> Result<Value, GatewayError> {
    let mut text = String::new();
    let mut finish = None;

    while let Some(item) = events.recv().await {
        match item? {
            StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
            StreamEvent::Finish { reason, usage } => finish = Some((reason, usage)),
            StreamEvent::ToolCallRequest { .. } | StreamEvent::ToolCallResult { .. } => {}
        }
    }

    let (reason, usage) = finish.ok_or_else(|| {
        GatewayError::Transport("Stream ended without a finish event".to_string())
    })?;

    Ok(json!({
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "usage": {
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        },
        "choices": [{
            "index": 0,
            "finish_reason": reason.as_str(),
            "message": {
                "role": "assistant",
                "content": announce::strip_text(&text),
            },
        }],
    }))
}
