//! OpenAI Chat Completions request/response schema.
//!
//! Only the fields the gateway consumes are typed strictly; tool-call
//! payloads stay as raw JSON because they are passed through verbatim.

use serde::{Deserialize, Serialize};

fn default_temperature() -> Option<f64> {
    Some(0.7)
}

fn default_top_p() -> Option<f64> {
    Some(1.0)
}

fn default_penalty() -> Option<f64> {
    Some(0.0)
}

// ── Request ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

fn default_tool_type() -> String {
    "function".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default = "default_tool_type", rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_top_p")]
    pub top_p: Option<f64>,
    #[serde(default = "default_penalty")]
    pub frequency_penalty: Option<f64>,
    #[serde(default = "default_penalty")]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
}

impl ChatCompletionRequest {
    /// Range and presence checks mirroring the OpenAI parameter contract.
    /// Returns the first violation as a caller-facing message.
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".into());
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(format!("temperature must be within [0, 2], got {t}"));
        }
        if let Some(p) = self.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(format!("top_p must be within [0, 1], got {p}"));
        }
        if let Some(f) = self.frequency_penalty
            && !(-2.0..=2.0).contains(&f)
        {
            return Err(format!("frequency_penalty must be within [-2, 2], got {f}"));
        }
        if let Some(p) = self.presence_penalty
            && !(-2.0..=2.0).contains(&p)
        {
            return Err(format!("presence_penalty must be within [-2, 2], got {p}"));
        }
        if let Some(m) = self.max_tokens
            && m < 1
        {
            return Err("max_tokens must be at least 1".into());
        }
        Ok(())
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

// ── Streaming chunks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>, choice: ChunkChoice) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".into(),
            created,
            model: model.into(),
            choices: vec![choice],
        }
    }
}

// ── Model listing ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    pub fn new(data: Vec<ModelCard>) -> Self {
        Self {
            object: "list".into(),
            data,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4",
            "messages": messages,
        }))
        .unwrap()
    }

    #[test]
    fn defaults_match_openai_contract() {
        let req = minimal_request(vec![ChatMessage::user("hi")]);
        assert_eq!(req.temperature, Some(0.7));
        assert_eq!(req.top_p, Some(1.0));
        assert_eq!(req.frequency_penalty, Some(0.0));
        assert!(!req.stream);
        assert!(req.tools.is_none());
    }

    #[test]
    fn empty_messages_fail_validation() {
        let req = minimal_request(vec![]);
        assert!(req.validate().unwrap_err().contains("messages"));
    }

    #[test]
    fn out_of_range_temperature_fails_validation() {
        let mut req = minimal_request(vec![ChatMessage::user("hi")]);
        req.temperature = Some(2.5);
        assert!(req.validate().unwrap_err().contains("temperature"));
    }

    #[test]
    fn tool_type_defaults_to_function() {
        let tool: Tool = serde_json::from_value(serde_json::json!({
            "function": {"name": "search", "parameters": {"type": "object"}}
        }))
        .unwrap();
        assert_eq!(tool.kind, "function");
    }

    #[test]
    fn tool_call_message_roundtrips() {
        let raw = serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "call_1", "function": {"name": "f", "arguments": "{}"}}]
        });
        let msg: ChatMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.role, "assistant");
        assert!(msg.content.is_none());
        assert!(msg.tool_calls.is_some());
    }
}
