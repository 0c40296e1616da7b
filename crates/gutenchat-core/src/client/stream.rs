//! Server-sent-event consumption and tool-call reassembly.
//!
//! The streaming endpoint delivers `data:` lines whose payloads carry
//! either content tokens or fragmented tool-call deltas. This module turns
//! a raw byte stream into ordered [`StreamEvent`]s: zero or more chunks,
//! then exactly one of `Completed` / `Failed`.
//!
//! All reassembly state lives in the consumption loop. Nothing is shared
//! across concurrent calls.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::wire::{StreamPayload, ToolCallDelta};
use super::ByteStream;
use crate::error::ChatCompletionError;
use crate::message::{PartialToolCall, StreamChunk, ToolCall};

/// Terminal marker on the data channel.
const DONE_MARKER: &str = "[DONE]";

/// One event on the streaming channel.
#[derive(Debug)]
pub enum StreamEvent {
    /// A content token or a partial tool-call snapshot, in arrival order.
    Chunk(StreamChunk),
    /// The stream finished. Fires at most once, after all chunks.
    Completed {
        message: String,
        tool_calls: Option<Vec<ToolCall>>,
    },
    /// The stream failed. Fires at most once, and never after `Completed`.
    Failed(ChatCompletionError),
}

// ── SSE line buffering ──────────────────────────────────────────────

/// Incremental splitter for the SSE byte stream.
///
/// Payloads may arrive split across reads, so bytes are buffered until a
/// newline lands. Only complete lines are decoded; a UTF-8 sequence can
/// straddle a read boundary but never a newline.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes, returning every complete `data:`
    /// payload it finished.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

// ── Tool-call reassembly ────────────────────────────────────────────

/// Accumulator for fragmented tool calls, keyed by stream index.
///
/// Argument text is appended in arrival order; ids and names are set when
/// a fragment actually supplies one. The map stays ordered so snapshots
/// and the final sequence come out in ascending index order.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAssembler {
    partials: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAssembler {
    pub fn apply(&mut self, delta: &ToolCallDelta) {
        let entry = self.partials.entry(delta.index).or_default();
        if let Some(id) = delta.id.as_deref() {
            if !id.is_empty() {
                entry.id = id.to_string();
            }
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                entry.name = name.clone();
            }
            if let Some(arguments) = &function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }

    /// Current partial records in index order.
    pub fn snapshot(&self) -> Vec<PartialToolCall> {
        self.partials.values().cloned().collect()
    }

    /// Parse every accumulated argument string into the final tool calls.
    /// An empty argument string maps to an empty object, never a parse
    /// attempt on empty input.
    pub fn finish(self) -> Result<Vec<ToolCall>, ChatCompletionError> {
        self.partials
            .into_values()
            .map(|partial| {
                let arguments = if partial.arguments.is_empty() {
                    serde_json::Map::new()
                } else {
                    serde_json::from_str(&partial.arguments).map_err(|e| {
                        ChatCompletionError::new(format!(
                            "invalid streamed arguments for tool '{}': {e}",
                            partial.name
                        ))
                    })?
                };
                Ok(ToolCall {
                    id: partial.id,
                    name: partial.name,
                    arguments,
                })
            })
            .collect()
    }
}

// ── Consumption loop ────────────────────────────────────────────────

/// Consume the byte stream to its terminal signal, forwarding events on
/// `events`. Sends `Completed` itself; the caller converts an `Err` into
/// the single `Failed` event.
///
/// The first finish reason ends reassembly; anything the wire sends after
/// it is ignored.
pub(crate) async fn drive(
    mut bytes: ByteStream,
    events: UnboundedSender<StreamEvent>,
) -> Result<(), ChatCompletionError> {
    let mut lines = SseLineBuffer::new();
    let mut assembler = ToolCallAssembler::default();
    let mut full_text = String::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk?;
        for data in lines.push(&chunk) {
            if data == DONE_MARKER {
                debug!("Stream closed without a finish reason");
                return complete(events, full_text, assembler);
            }

            let payload: StreamPayload = serde_json::from_str(&data).map_err(|e| {
                ChatCompletionError::new(format!("malformed stream payload: {e}"))
            })?;

            let Some(choice) = payload.choices.first() else {
                continue;
            };

            if let Some(text) = choice.delta.content.as_deref() {
                if !text.is_empty() {
                    full_text.push_str(text);
                    if events
                        .send(StreamEvent::Chunk(StreamChunk::Content(text.to_string())))
                        .is_err()
                    {
                        // Receiver dropped: the caller lost interest.
                        return Ok(());
                    }
                }
            }

            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    assembler.apply(delta);
                }
                if events
                    .send(StreamEvent::Chunk(StreamChunk::ToolCalls(assembler.snapshot())))
                    .is_err()
                {
                    return Ok(());
                }
            }

            if choice.finish_reason.is_some() {
                return complete(events, full_text, assembler);
            }
        }
    }

    // Transport ended the stream without [DONE] or a finish reason.
    // Deliver what was accumulated rather than dropping it.
    debug!("Byte stream ended early, completing with accumulated state");
    complete(events, full_text, assembler)
}

fn complete(
    events: UnboundedSender<StreamEvent>,
    message: String,
    assembler: ToolCallAssembler,
) -> Result<(), ChatCompletionError> {
    let calls = assembler.finish()?;
    let tool_calls = if calls.is_empty() { None } else { Some(calls) };
    let _ = events.send(StreamEvent::Completed { message, tool_calls });
    Ok(())
}
