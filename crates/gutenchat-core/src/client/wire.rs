//! OpenAI-compatible wire protocol types and conversions.
//!
//! The REST proxy speaks the standard chat completions format, so the
//! request/response shapes here match any OpenAI-compatible endpoint.
//! Conversion from the internal conversation model is pure and
//! order-preserving; invalid history entries are repaired by omission,
//! never by failing the whole request.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ChatCompletionError;
use crate::message::{ConversationMessage, Role, ToolCall, ToolDescriptor};

// ── Request types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// One message in the wire `messages` array.
///
/// `content` is always serialized: the wire requires an explicit `null`
/// alongside `tool_calls` rather than a missing field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool call in wire form (arguments as a JSON-encoded string).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Tool definition in the wire function-calling schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub function: FunctionSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ── Response types (non-streaming) ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WireResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: MessageBody,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

// ── Response types (streaming) ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One fragment of a tool call, keyed by a stream-assigned index.
#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

// ── Error envelope ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    code: Option<String>,
}

/// Build a [`ChatCompletionError`] from a non-2xx response body, keeping
/// the upstream message and code when the body parses as the standard
/// error envelope.
pub fn error_from_response(status: u16, body: &str) -> ChatCompletionError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => ChatCompletionError::with_status(parsed.error.message, status, parsed.error.code),
        Err(_) => ChatCompletionError::with_status(
            format!("chat endpoint returned HTTP {status}: {body}"),
            status,
            None,
        ),
    }
}

// ── Conversions ─────────────────────────────────────────────────────

/// Convert conversation history into the wire message array.
///
/// - `system`/`user` pass through; missing content becomes an empty string.
/// - Assistant messages with neither content nor tool calls are dropped
///   with a warning.
/// - Assistant `content` is `null` exactly when tool calls are present and
///   content is absent.
/// - Matched tool results follow their assistant message immediately as
///   `tool`-role messages; orphaned results are dropped. Standalone tool
///   messages are never emitted — the wire rejects a `tool` message that
///   does not directly follow its assistant tool call.
pub fn to_wire_messages(messages: &[ConversationMessage]) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System | Role::User => out.push(WireMessage {
                role: msg.role.as_str().into(),
                content: Some(msg.content.clone().unwrap_or_default()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::Assistant => {
                let has_content = msg.content.as_deref().is_some_and(|c| !c.is_empty());
                if !has_content && msg.tool_calls.is_empty() {
                    warn!(id = %msg.id, "Dropping assistant message with no content and no tool calls");
                    continue;
                }

                let tool_calls = if msg.tool_calls.is_empty() {
                    None
                } else {
                    Some(msg.tool_calls.iter().map(to_wire_tool_call).collect())
                };

                // Null content is only valid alongside tool_calls.
                let content = if tool_calls.is_some() && !has_content {
                    None
                } else {
                    Some(msg.content.clone().unwrap_or_default())
                };

                out.push(WireMessage {
                    role: "assistant".into(),
                    content,
                    tool_calls,
                    tool_call_id: None,
                });

                if msg.tool_calls.is_empty() {
                    continue;
                }
                for result in &msg.tool_results {
                    if !msg.tool_calls.iter().any(|tc| tc.id == result.id) {
                        continue;
                    }
                    let content = match &result.error {
                        Some(err) => err.clone(),
                        None => serde_json::to_string(&result.result).unwrap_or_default(),
                    };
                    out.push(WireMessage {
                        role: "tool".into(),
                        content: Some(content),
                        tool_calls: None,
                        tool_call_id: Some(result.id.clone()),
                    });
                }
            }
        }
    }

    out
}

fn to_wire_tool_call(tc: &ToolCall) -> WireToolCall {
    let arguments = serde_json::to_string(&tc.arguments).unwrap_or_else(|_| "{}".into());
    WireToolCall {
        id: tc.id.clone(),
        call_type: "function".into(),
        function: WireFunctionCall {
            name: tc.name.clone(),
            arguments,
        },
    }
}

/// Convert tool descriptors into the wire schema. One-to-one, no
/// filtering, no reordering.
pub fn to_wire_tools(tools: &[ToolDescriptor]) -> Vec<ToolSchema> {
    tools
        .iter()
        .map(|t| ToolSchema {
            schema_type: "function".into(),
            function: FunctionSchema {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}
