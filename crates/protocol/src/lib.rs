//! Wire protocol between the gateway and its browser clients.
//!
//! All communication uses JSON text frames over WebSocket. Every frame
//! carries a `type` tag and a wall-clock `timestamp`; request/response
//! frames additionally carry a `request_id`.
//!
//! Frame directions:
//! - [`ClientBoundFrame`] — gateway → client
//! - [`ServerBoundFrame`] — client → gateway

use serde::{Deserialize, Serialize};

pub mod openai;

// ── Constants ────────────────────────────────────────────────────────────────

/// Interval between heartbeat probes sent to every client.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;
/// A client whose last inbound frame is older than this is considered gone.
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
/// How long a forwarded completion may take before the HTTP caller gets a 504.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;
/// Synthesized SSE content deltas are cut into pieces of this many characters.
pub const SSE_CONTENT_CHUNK_CHARS: usize = 10;

pub const REQUEST_ID_PREFIX: &str = "req_";
pub const CLIENT_ID_PREFIX: &str = "client_";

/// Marker whose presence in a system message suppresses the preamble.
pub const RESPONSE_FORMAT_MARKER: &str = "RESPONSE FORMAT";

/// Instructions appended to system messages so the remote agent answers in
/// the XML envelope the gateway can decode.
pub const RESPONSE_FORMAT_PREAMBLE: &str = r#"

====

RESPONSE FORMAT

Your response MUST use the following XML format. Do NOT use code blocks like ```xml.

<content>
[Your response text here. This field is REQUIRED and must contain your main response.]
Write freely - you can include any characters, quotes, brackets, or special symbols. They will be parsed correctly.
</content>
<tool_calls>
[Optional: if you need to call tools, include a JSON array here like [{"name": "tool_name", "arguments": {"key": "value"}}]
If no tools are needed, omit this entire <tool_calls> section entirely.
]
</tool_calls>

IMPORTANT:
1. The <content> tag MUST be present and contain your main response
2. The <tool_calls> section is OPTIONAL - only include it if you're calling tools
3. Do NOT use code block markers (no ```xml or ```)
4. Write your content naturally - special characters are handled automatically
5. When calling tools, use valid JSON inside <tool_calls>
6. ALWAYS end your response with <response_done> on its own line
"#;

// ── Error envelope ───────────────────────────────────────────────────────────

/// Body of the `{"error": {...}}` envelope returned on every HTTP failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, kind: impl Into<String>, code: u16) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                r#type: kind.into(),
                code,
            },
        }
    }
}

// ── Gateway → client frames ──────────────────────────────────────────────────

/// Discriminated union of every frame the gateway sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientBoundFrame {
    ConnectionEstablished {
        client_id: String,
        timestamp: String,
        message: String,
    },
    Heartbeat {
        timestamp: String,
    },
    CompletionRequest(CompletionRequestFrame),
    Error {
        message: String,
        timestamp: String,
    },
}

impl ClientBoundFrame {
    pub fn connection_established(client_id: impl Into<String>, timestamp: String) -> Self {
        Self::ConnectionEstablished {
            client_id: client_id.into(),
            timestamp,
            message: "connection established, ready for requests".into(),
        }
    }

    pub fn heartbeat(timestamp: String) -> Self {
        Self::Heartbeat { timestamp }
    }

    pub fn error(message: impl Into<String>, timestamp: String) -> Self {
        Self::Error {
            message: message.into(),
            timestamp,
        }
    }
}

/// The forwarded completion, already rewritten for the receiving session.
///
/// `stream` is always false on the wire: the client transport is not
/// incremental. The caller's original choice travels in `original_stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequestFrame {
    pub request_id: String,
    pub model: String,
    pub messages: Vec<openai::ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub original_stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<openai::Tool>>,
    pub timestamp: String,
}

// ── Client → gateway frames ──────────────────────────────────────────────────

/// Discriminated union of every frame a client may send to the gateway.
///
/// Unknown tags fail deserialization; the socket reader answers those with
/// an on-socket [`ClientBoundFrame::Error`] rather than dropping the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerBoundFrame {
    /// Informational self-introduction; only refreshes liveness.
    Register {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    /// The client is idle and willing to take a request.
    ClientReady {},
    /// Answer to a heartbeat probe.
    HeartbeatResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    CompletionResponse(CompletionResponseFrame),
    /// Diagnostic log line forwarded to the debug sink.
    ClientLog(ClientLogFrame),
}

/// A client's reply to a forwarded completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponseFrame {
    pub request_id: String,
    #[serde(default)]
    pub content: Option<String>,
    /// Some clients surface tool calls beside the envelope instead of
    /// inside it; the decoder falls back to this field.
    #[serde(default)]
    pub tool_calls: Option<serde_json::Value>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub error: Option<ClientErrorBody>,
}

/// Error object a client attaches to a failed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub code: Option<u16>,
}

/// Tags a client may legitimately send; anything else earns an on-socket
/// `unknown type` error reply.
pub const SERVER_BOUND_TYPES: &[&str] = &[
    "register",
    "client_ready",
    "heartbeat_response",
    "completion_response",
    "client_log",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientLogFrame {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}
