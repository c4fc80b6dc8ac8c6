use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::error::GatewayError;

/// Provider-agnostic stream events. This is the only shape that crosses the
/// boundary between provider adapters, the tool-call loop, and the response
/// translator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    /// Emitted once a tool call's arguments are complete, never mid-call.
    ToolCallRequest {
        id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolCallResult {
        id: String,
        content: String,
    },
    Finish {
        reason: FinishReason,
        usage: Usage,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
        }
    }

    /// Maps an OpenAI-style finish reason string.
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }

    /// Maps an Anthropic stop reason string.
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Channel capacity for event streams. Bounded so a slow consumer exerts
/// backpressure on the producing provider stream.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

pub type EventSender = mpsc::Sender<Result<StreamEvent, GatewayError>>;
pub type EventStream = mpsc::Receiver<Result<StreamEvent, GatewayError>>;

pub fn event_channel() -> (EventSender, EventStream) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_mappings() {
        assert_eq!(FinishReason::from_openai("stop"), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_openai("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(FinishReason::from_openai("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_anthropic("end_turn"),
            FinishReason::Stop
        );
        assert_eq!(
            FinishReason::from_anthropic("tool_use"),
            FinishReason::ToolCalls
        );
        assert_eq!(
            FinishReason::from_anthropic("max_tokens"),
            FinishReason::Length
        );
    }

    #[test]
    fn usage_deserializes_with_missing_fields() {
        let usage: Usage = serde_json::from_str(r#"{"prompt_tokens": 3}"#).unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 0);
    }
}
