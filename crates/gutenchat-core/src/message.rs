//! Conversation data model.
//!
//! These types define the contract between the sidebar's conversation state
//! and the chat completion client. Everything here is created per
//! request/response cycle; nothing persists beyond the call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::wire::ToolSchema;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
///
/// Invariant: an assistant message must carry non-empty `content` or at
/// least one tool call. One with neither is invalid and is dropped during
/// wire conversion, never sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    fn with_role(role: Role, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Assistant turn that requested tool invocations, with the results the
    /// caller obtained by executing them.
    pub fn assistant_with_tool_calls(
        content: Option<&str>,
        tool_calls: Vec<ToolCall>,
        tool_results: Vec<ToolResult>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.map(Into::into),
            tool_calls,
            tool_results,
            timestamp: Utc::now(),
        }
    }
}

/// A model-requested tool invocation with parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// The caller-supplied outcome of executing one tool call.
///
/// Only emitted to the wire when `id` matches a tool call on the same
/// assistant message; orphaned results are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An externally supplied tool definition, before wire conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One chat completion request, ready for wire conversion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolSchema>,
    pub tool_choice: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// In-flight snapshot of one tool call being reassembled from the stream.
///
/// `arguments` is the raw accumulated text; it only becomes structured data
/// when the stream signals completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One streaming fragment, forwarded to the consumer as it arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A content token. Delivered in order, never buffered.
    Content(String),
    /// Snapshot of all partial tool calls after a tool-call delta, in
    /// index order. Consumers that only care about the final state may
    /// ignore intermediate snapshots.
    ToolCalls(Vec<PartialToolCall>),
}

/// Result of the high-level [`send_message`](crate::client::ChatCompletionClient::send_message).
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub message: String,
    pub tool_calls: Option<Vec<ToolCall>>,
}
