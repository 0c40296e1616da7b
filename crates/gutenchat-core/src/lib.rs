//! gutenchat-core: streaming chat-completion client for the gutenchat
//! editor assistant.
//!
//! The assistant sidebar talks to a REST proxy exposing an
//! OpenAI-compatible chat completions endpoint. This crate owns everything
//! between the conversation state and that wire:
//!
//! - [`config`] — lazy, cached resolution of the host-injected settings blob
//! - [`message`] — the conversation data model (messages, tool calls/results)
//! - [`client`] — the completion client: non-streaming, SSE streaming with
//!   incremental tool-call reassembly, and wire-format conversion
//! - [`error`] — the single [`ChatCompletionError`] kind every failure
//!   normalizes into
//!
//! # Quick start
//!
//! ```no_run
//! use gutenchat_core::client::ChatCompletionClient;
//!
//! # async fn run() -> Result<(), gutenchat_core::error::ChatCompletionError> {
//! let client = ChatCompletionClient::new();
//! let reply = client.send_message("Add a section", &[], &[]).await?;
//! println!("{}", reply.message);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod message;

pub use client::{ChatCompletionClient, ClientOptions};
pub use client::stream::StreamEvent;
pub use error::ChatCompletionError;
pub use message::{
    AssistantReply, ChatRequest, ConversationMessage, PartialToolCall, Role, StreamChunk,
    ToolCall, ToolDescriptor, ToolResult,
};
