//! Decoding of the XML-lite envelope carried in client replies.
//!
//! Clients answer in the shape the response-format preamble asks for:
//!
//! ```text
//! <content>...free text...</content>
//! <tool_calls>[{"name": ..., "arguments": {...}}]</tool_calls>
//! <response_done>
//! ```
//!
//! The decoder never fails hard. A reply with no recognizable envelope
//! degrades to the raw text with no tool calls; an unparseable
//! `<tool_calls>` body is logged and treated as absent.

use tracing::warn;

use switchboard_protocol::CompletionResponseFrame;

const CONTENT_OPEN: &str = "<content>";
const CONTENT_CLOSE: &str = "</content>";
const TOOL_CALLS_OPEN: &str = "<tool_calls>";
const TOOL_CALLS_CLOSE: &str = "</tool_calls>";
const RESPONSE_DONE: &str = "<response_done>";

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReply {
    pub content: String,
    pub tool_calls: Option<serde_json::Value>,
}

/// Extract content and tool calls from a raw reply body.
pub fn decode_envelope(raw: &str) -> DecodedReply {
    let content = match extract_content(raw) {
        Some(inner) => inner.trim().to_string(),
        // No <content> pair: everything before the terminator (or the whole
        // text when the terminator is missing too).
        None => raw
            .split(RESPONSE_DONE)
            .next()
            .unwrap_or(raw)
            .trim()
            .to_string(),
    };

    let tool_calls = extract_tool_calls(raw);

    DecodedReply {
        content,
        tool_calls,
    }
}

/// Decode a full reply frame, falling back to the frame's top-level
/// `tool_calls` field when the envelope carries none.
pub fn decode_reply(frame: &CompletionResponseFrame) -> DecodedReply {
    let raw = frame.content.as_deref().unwrap_or("");
    let mut decoded = decode_envelope(raw);

    if decoded.tool_calls.is_none()
        && let Some(top_level) = non_empty(frame.tool_calls.clone())
    {
        decoded.tool_calls = Some(top_level);
    }

    decoded
}

fn extract_content(raw: &str) -> Option<&str> {
    let start = raw.find(CONTENT_OPEN)? + CONTENT_OPEN.len();
    let end = raw[start..].find(CONTENT_CLOSE)? + start;
    Some(&raw[start..end])
}

fn extract_tool_calls(raw: &str) -> Option<serde_json::Value> {
    let start = raw.find(TOOL_CALLS_OPEN)? + TOOL_CALLS_OPEN.len();
    let end = raw[start..].find(TOOL_CALLS_CLOSE)? + start;
    let body = raw[start..end].trim();

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => non_empty(Some(value)),
        Err(e) => {
            warn!(error = %e, "failed to parse tool_calls JSON, treating as absent");
            None
        },
    }
}

/// Normalize "no tool calls": null and `[]` both count as absent.
fn non_empty(value: Option<serde_json::Value>) -> Option<serde_json::Value> {
    match value {
        Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Array(items)) if items.is_empty() => None,
        other => other,
    }
}
