//! Outbound request shaping.
//!
//! The rewriter turns an inbound OpenAI request into the frame a session
//! receives. System messages and the tool catalog are fingerprinted and
//! elided when the session already holds an identical copy; system text gets
//! the response-format preamble appended; of the conversation itself only
//! the last user message travels — prior turns already live in the remote
//! chat session's own history, so re-sending them would duplicate context.

use {serde_json::Value, sha2::Digest};

use {
    switchboard_protocol::{
        CompletionRequestFrame, RESPONSE_FORMAT_MARKER, RESPONSE_FORMAT_PREAMBLE,
        openai::{ChatCompletionRequest, ChatMessage},
    },
};

/// What the rewriter produced for one forwarded request.
#[derive(Debug)]
pub struct RewriteOutcome {
    pub frame: CompletionRequestFrame,
    /// Whether system messages were included in the outbound frame.
    pub sent_system: bool,
    /// Whether the tool catalog was included in the outbound frame.
    pub sent_tools: bool,
    /// Digest of this request's system bundle (None when it has none).
    pub system_fingerprint: Option<String>,
    /// Digest of this request's tool catalog (None when it has none).
    pub tools_fingerprint: Option<String>,
}

impl RewriteOutcome {
    /// Fingerprint to store back on the session for the system bundle, if it
    /// was actually transmitted.
    pub fn system_to_store(&self) -> Option<String> {
        if self.sent_system {
            self.system_fingerprint.clone()
        } else {
            None
        }
    }

    pub fn tools_to_store(&self) -> Option<String> {
        if self.sent_tools {
            self.tools_fingerprint.clone()
        } else {
            None
        }
    }
}

/// Build the outbound frame for `request`, eliding payloads whose
/// fingerprints match what the session last received.
pub fn rewrite_request(
    request: &ChatCompletionRequest,
    request_id: &str,
    stored_system_fp: Option<&str>,
    stored_tools_fp: Option<&str>,
    timestamp: String,
) -> RewriteOutcome {
    let system_messages: Vec<&ChatMessage> = request
        .messages
        .iter()
        .filter(|m| m.role == "system")
        .collect();
    let system_contents: Vec<&str> = system_messages
        .iter()
        .filter_map(|m| m.content.as_deref())
        .collect();

    let system_fingerprint = if system_contents.is_empty() {
        None
    } else {
        Some(fingerprint("sys", &serde_json::json!(system_contents)))
    };

    let tools_value = request
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .and_then(|t| serde_json::to_value(t).ok());
    let tools_fingerprint = tools_value.as_ref().map(|v| fingerprint("tools", v));

    let send_system = system_fingerprint.as_deref() != stored_system_fp;
    let send_tools = tools_fingerprint.as_deref() != stored_tools_fp;

    let mut messages = Vec::new();
    let sent_system = send_system && !system_messages.is_empty();
    if sent_system {
        for msg in &system_messages {
            messages.push(ChatMessage {
                role: "system".into(),
                content: Some(annotate_system(msg.content.as_deref().unwrap_or(""))),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }
    if let Some(last_user) = request.messages.iter().rev().find(|m| m.role == "user") {
        messages.push(last_user.clone());
    }

    let sent_tools = send_tools && tools_value.is_some();
    let tools = if sent_tools {
        request.tools.clone()
    } else {
        None
    };

    RewriteOutcome {
        frame: CompletionRequestFrame {
            request_id: request_id.to_string(),
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            original_stream: request.stream,
            tools,
            timestamp,
        },
        sent_system,
        sent_tools,
        system_fingerprint,
        tools_fingerprint,
    }
}

/// Append the response-format preamble unless the text already carries the
/// marker.
fn annotate_system(content: &str) -> String {
    if content.contains(RESPONSE_FORMAT_MARKER) {
        content.to_string()
    } else {
        format!("{content}{RESPONSE_FORMAT_PREAMBLE}")
    }
}

/// 128-bit content digest over type-tagged canonical JSON.
///
/// The tag keeps system and tool payloads in separate namespaces; canonical
/// serialization makes the digest independent of object key order.
pub fn fingerprint(tag: &str, value: &Value) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(tag.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_json(value).as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Serialize with recursively sorted object keys. `serde_json`'s map order
/// depends on enabled features, so the stable form is written by hand.
fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        leaf => out.push_str(&leaf.to_string()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use switchboard_protocol::openai::{FunctionDefinition, Tool};

    use super::*;

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4",
            "messages": messages,
        }))
        .unwrap()
    }

    fn tool(name: &str) -> Tool {
        Tool {
            kind: "function".into(),
            function: FunctionDefinition {
                name: name.into(),
                description: None,
                parameters: Some(serde_json::json!({"type": "object", "properties": {}})),
            },
        }
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a = serde_json::json!({"b": {"y": 1, "x": 2}, "a": [3, {"k": 4, "j": 5}]});
        let b = serde_json::json!({"a": [3, {"j": 5, "k": 4}], "b": {"x": 2, "y": 1}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            canonical_json(&a),
            r#"{"a":[3,{"j":5,"k":4}],"b":{"x":2,"y":1}}"#
        );
    }

    #[test]
    fn fingerprint_is_128_bits_of_hex() {
        let fp = fingerprint("sys", &serde_json::json!(["S"]));
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn type_tag_separates_equal_payloads() {
        let payload = serde_json::json!(["S"]);
        assert_ne!(fingerprint("sys", &payload), fingerprint("tools", &payload));
    }

    #[test]
    fn scalar_and_singleton_list_do_not_collide() {
        assert_ne!(
            fingerprint("sys", &serde_json::json!("S")),
            fingerprint("sys", &serde_json::json!(["S"]))
        );
    }

    #[test]
    fn key_order_does_not_change_tool_fingerprints() {
        let a = serde_json::json!([{"name": "f", "parameters": {"x": 1, "y": 2}}]);
        let b = serde_json::json!([{"parameters": {"y": 2, "x": 1}, "name": "f"}]);
        assert_eq!(fingerprint("tools", &a), fingerprint("tools", &b));
    }

    #[test]
    fn first_send_includes_annotated_system() {
        let req = request(vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("hello"),
        ]);
        let outcome = rewrite_request(&req, "req_00000001", None, None, "ts".into());

        assert!(outcome.sent_system);
        assert_eq!(outcome.frame.messages.len(), 2);
        let system = &outcome.frame.messages[0];
        let content = system.content.as_deref().unwrap();
        assert!(content.starts_with("You are terse."));
        assert!(content.contains(RESPONSE_FORMAT_MARKER));
        assert!(content.contains("<response_done>"));
    }

    #[test]
    fn matching_fingerprint_elides_system() {
        let req = request(vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("hello"),
        ]);
        let first = rewrite_request(&req, "req_00000001", None, None, "ts".into());
        let stored = first.system_fingerprint.clone().unwrap();

        let second = rewrite_request(&req, "req_00000002", Some(&stored), None, "ts".into());
        assert!(!second.sent_system);
        assert_eq!(second.frame.messages.len(), 1);
        assert_eq!(second.frame.messages[0].role, "user");
        assert!(second.system_to_store().is_none());
    }

    #[test]
    fn preamble_is_not_appended_twice() {
        let already = format!("instructions {RESPONSE_FORMAT_MARKER} more");
        let req = request(vec![ChatMessage::system(&already), ChatMessage::user("q")]);
        let outcome = rewrite_request(&req, "req_00000001", None, None, "ts".into());
        assert_eq!(outcome.frame.messages[0].content.as_deref(), Some(already.as_str()));
    }

    #[test]
    fn only_the_last_user_message_travels() {
        let req = request(vec![
            ChatMessage::user("first question"),
            ChatMessage {
                role: "assistant".into(),
                content: Some("earlier answer".into()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage::user("follow-up"),
        ]);
        let outcome = rewrite_request(&req, "req_00000001", None, None, "ts".into());
        assert_eq!(outcome.frame.messages.len(), 1);
        assert_eq!(
            outcome.frame.messages[0].content.as_deref(),
            Some("follow-up")
        );
    }

    #[test]
    fn tools_are_sent_once_until_the_catalog_changes() {
        let mut req = request(vec![ChatMessage::user("q")]);
        req.tools = Some(vec![tool("t1")]);

        let first = rewrite_request(&req, "req_00000001", None, None, "ts".into());
        assert!(first.sent_tools);
        let stored = first.tools_to_store().unwrap();

        let second = rewrite_request(&req, "req_00000002", None, Some(&stored), "ts".into());
        assert!(!second.sent_tools);
        assert!(second.frame.tools.is_none());

        req.tools = Some(vec![tool("t2")]);
        let third = rewrite_request(&req, "req_00000003", None, Some(&stored), "ts".into());
        assert!(third.sent_tools);
        assert_eq!(third.frame.tools.as_ref().unwrap()[0].function.name, "t2");
    }

    #[test]
    fn empty_tool_catalog_counts_as_no_tools() {
        let mut req = request(vec![ChatMessage::user("q")]);
        req.tools = Some(vec![]);
        let outcome = rewrite_request(&req, "req_00000001", None, None, "ts".into());
        assert!(!outcome.sent_tools);
        assert!(outcome.tools_fingerprint.is_none());
    }

    #[test]
    fn outbound_frame_never_streams() {
        let mut req = request(vec![ChatMessage::user("q")]);
        req.stream = true;
        let outcome = rewrite_request(&req, "req_00000001", None, None, "ts".into());
        assert!(!outcome.frame.stream);
        assert!(outcome.frame.original_stream);
    }

    #[test]
    fn no_system_messages_leaves_fingerprint_empty() {
        let req = request(vec![ChatMessage::user("q")]);
        let outcome = rewrite_request(&req, "req_00000001", None, None, "ts".into());
        assert!(outcome.system_fingerprint.is_none());
        assert!(!outcome.sent_system);
    }
}
