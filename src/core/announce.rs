//! Inline tool-usage narration markers.
//!
//! Announcements let the gateway narrate tool activity ("Searching the
//! web...") inside the assistant-visible output stream without that text
//! ever reaching a provider. `encode` wraps narration in a fixed marker
//! pair; `strip` removes every encoded span from assistant messages before
//! a conversation is replayed upstream. Both are pure functions over
//! immutable values, and stripping an encode-augmented history yields the
//! exact bytes of the unaugmented history.

use serde_json::Value;

use crate::api::ChatMessage;

const ANNOUNCEMENT_START: &str = "<span class=\"tool_announcement\">";
const ANNOUNCEMENT_END: &str = "</span><span class=\"tool_announcement_end\"></span>";
const ANNOUNCEMENT_PADDING: &str = "\n\n";

/// Wraps narration in the announcement markers, padded with blank lines so
/// it renders as its own paragraph in the output stream.
pub fn encode(description: &str) -> String {
    format!(
        "{}{}{}{}{}",
        ANNOUNCEMENT_PADDING, ANNOUNCEMENT_START, description, ANNOUNCEMENT_END, ANNOUNCEMENT_PADDING
    )
}

/// Removes every announcement span (including the padding `encode` adds)
/// from a text value. Unmatched markers are left untouched.
pub fn strip_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let Some(start) = rest.find(ANNOUNCEMENT_START) else {
            out.push_str(rest);
            break;
        };
        let after_start = &rest[start + ANNOUNCEMENT_START.len()..];
        let Some(end) = after_start.find(ANNOUNCEMENT_END) else {
            out.push_str(rest);
            break;
        };

        let mut keep = &rest[..start];
        if keep.ends_with(ANNOUNCEMENT_PADDING) {
            keep = &keep[..keep.len() - ANNOUNCEMENT_PADDING.len()];
        }
        out.push_str(keep);

        let mut tail = &after_start[end + ANNOUNCEMENT_END.len()..];
        if let Some(stripped) = tail.strip_prefix(ANNOUNCEMENT_PADDING) {
            tail = stripped;
        }
        rest = tail;
    }

    out
}

/// Strips announcement spans from every assistant message, covering both
/// plain string content and block-list content.
pub fn strip_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| {
            if message.role != "assistant" {
                return message.clone();
            }
            let mut stripped = message.clone();
            stripped.content = strip_content(&message.content);
            stripped
        })
        .collect()
}

fn strip_content(content: &Value) -> Value {
    match content {
        Value::String(text) => Value::String(strip_text(text)),
        Value::Array(blocks) => Value::Array(
            blocks
                .iter()
                .map(|block| {
                    let is_text_block = block
                        .get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|kind| kind == "text");
                    if !is_text_block {
                        return block.clone();
                    }
                    let mut stripped = block.clone();
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        stripped["text"] = Value::String(strip_text(text));
                    }
                    stripped
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
