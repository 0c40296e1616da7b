//! Chat completion client.
//!
//! [`ChatCompletionClient`] owns the connection settings and turns
//! conversation history into requests against the proxy's
//! OpenAI-compatible endpoint:
//!
//! - [`ChatCompletionClient::complete`] — one blocking completion
//! - [`ChatCompletionClient::stream_completion`] — SSE streaming with
//!   incremental tool-call reassembly
//! - [`ChatCompletionClient::send_message`] — high-level convenience send
//!
//! The client is an explicit constructible object; callers that want a
//! shared instance construct one and pass it around. No retries happen
//! here — retry policy belongs to the caller.

pub mod stream;
pub mod wire;

use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{self, AmbientSource, EditorSettings, SettingsSource};
use crate::error::ChatCompletionError;
use crate::message::{
    AssistantReply, ChatRequest, ConversationMessage, ToolCall, ToolDescriptor,
};
use stream::StreamEvent;
use wire::{WireRequest, WireResponse};

/// Raw SSE bytes from the transport, errors already normalized.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatCompletionError>> + Send>>;

/// Response to a non-streaming request: status plus unparsed body.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

/// The HTTP seam. Production uses [`HttpTransport`]; tests stub this to
/// script responses and failures.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one non-streaming request, returning whatever the endpoint
    /// sent regardless of status.
    async fn execute(
        &self,
        url: &str,
        nonce: &str,
        request: &WireRequest,
    ) -> Result<TransportReply, ChatCompletionError>;

    /// Open one streaming request. A non-2xx response is an error here;
    /// a 2xx yields the raw event stream.
    async fn execute_stream(
        &self,
        url: &str,
        nonce: &str,
        request: &WireRequest,
    ) -> Result<ByteStream, ChatCompletionError>;
}

/// `reqwest`-backed transport speaking to the REST proxy.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        url: &str,
        nonce: &str,
        request: &WireRequest,
    ) -> Result<TransportReply, ChatCompletionError> {
        let response = self
            .client
            .post(url)
            .header("X-WP-Nonce", nonce)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(ChatCompletionError::transport)?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(ChatCompletionError::transport)?;
        Ok(TransportReply { status, body })
    }

    async fn execute_stream(
        &self,
        url: &str,
        nonce: &str,
        request: &WireRequest,
    ) -> Result<ByteStream, ChatCompletionError> {
        let response = self
            .client
            .post(url)
            .header("X-WP-Nonce", nonce)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(ChatCompletionError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(wire::error_from_response(status.as_u16(), &body));
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ChatCompletionError::transport)),
        ))
    }
}

/// Defaults applied to requests the client builds itself.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// First completion choice of a non-streaming call.
#[derive(Debug, Clone)]
pub struct CompletionMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// The chat completion client.
///
/// Settings resolve lazily on first use and stay cached for the lifetime
/// of this instance (clones share the cache); a fresh instance re-resolves.
#[derive(Clone)]
pub struct ChatCompletionClient {
    transport: Arc<dyn Transport>,
    source: Arc<dyn SettingsSource>,
    settings: Arc<OnceLock<EditorSettings>>,
    options: ClientOptions,
}

impl Default for ChatCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatCompletionClient {
    /// Client over HTTP with ambient settings and default options.
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(HttpTransport::new()),
            Arc::new(AmbientSource),
            ClientOptions::default(),
        )
    }

    /// Client with an explicit transport, settings source, and options.
    pub fn with_parts(
        transport: Arc<dyn Transport>,
        source: Arc<dyn SettingsSource>,
        options: ClientOptions,
    ) -> Self {
        Self {
            transport,
            source,
            settings: Arc::new(OnceLock::new()),
            options,
        }
    }

    /// Resolved connection settings. Reads the source at most once.
    pub fn settings(&self) -> &EditorSettings {
        self.settings
            .get_or_init(|| config::resolve(self.source.as_ref()))
    }

    /// Build a request from history and tools using the client defaults.
    /// `tool_choice` is `"auto"` only when tools are present.
    pub fn request(
        &self,
        messages: Vec<ConversationMessage>,
        tools: &[ToolDescriptor],
    ) -> ChatRequest {
        ChatRequest {
            model: self.options.model.clone(),
            messages,
            tools: wire::to_wire_tools(tools),
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        }
    }

    fn to_wire_request(&self, request: ChatRequest, streaming: bool) -> WireRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools)
        };
        WireRequest {
            model: request.model,
            messages: wire::to_wire_messages(&request.messages),
            tools,
            tool_choice: request.tool_choice,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: streaming,
        }
    }

    /// Execute one non-streaming chat completion and return the first
    /// choice's message.
    ///
    /// A non-2xx response keeps the HTTP status and the upstream error
    /// code on the returned error; a 2xx with zero choices is an error
    /// with no status.
    pub async fn complete(
        &self,
        request: ChatRequest,
    ) -> Result<CompletionMessage, ChatCompletionError> {
        let settings = self.settings().clone();
        let wire_request = self.to_wire_request(request, false);

        debug!(
            model = %wire_request.model,
            msg_count = wire_request.messages.len(),
            "Sending chat completion request"
        );

        let reply = self
            .transport
            .execute(&settings.endpoint_url(), &settings.nonce, &wire_request)
            .await?;

        if !(200..300).contains(&reply.status) {
            return Err(wire::error_from_response(reply.status, &reply.body));
        }

        let response: WireResponse = serde_json::from_str(&reply.body).map_err(|e| {
            ChatCompletionError::new(format!("failed to parse chat completion response: {e}"))
        })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatCompletionError::new("chat completion returned no choices"))?;

        let tool_calls = match choice.message.tool_calls {
            Some(calls) => calls
                .into_iter()
                .filter_map(|tc| {
                    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(
                        &tc.function.arguments,
                    ) {
                        Ok(arguments) => Some(ToolCall {
                            id: tc.id,
                            name: tc.function.name,
                            arguments,
                        }),
                        Err(e) => {
                            warn!(
                                tool = %tc.function.name,
                                error = %e,
                                raw = %tc.function.arguments,
                                "Failed to parse tool arguments, skipping"
                            );
                            None
                        }
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        debug!(tool_calls = tool_calls.len(), "Received chat completion");

        Ok(CompletionMessage {
            content: choice.message.content,
            tool_calls,
        })
    }

    /// Execute one streaming chat completion.
    ///
    /// Events arrive on the returned channel in wire order: zero or more
    /// [`StreamEvent::Chunk`]s, then exactly one of `Completed`/`Failed`,
    /// then the channel closes. Dropping the receiver abandons the call.
    pub fn stream_completion(
        &self,
        request: ChatRequest,
    ) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::clone(&self.transport);
        let settings = self.settings().clone();
        let wire_request = self.to_wire_request(request, true);

        tokio::spawn(async move {
            debug!(model = %wire_request.model, "Opening streaming chat completion");
            let result = match transport
                .execute_stream(&settings.endpoint_url(), &settings.nonce, &wire_request)
                .await
            {
                Ok(bytes) => stream::drive(bytes, tx.clone()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let _ = tx.send(StreamEvent::Failed(e));
            }
        });

        rx
    }

    /// High-level send: append a fresh user message to `context`, attach
    /// tools if any, and run one non-streaming completion.
    pub async fn send_message(
        &self,
        text: &str,
        context: &[ConversationMessage],
        tools: &[ToolDescriptor],
    ) -> Result<AssistantReply, ChatCompletionError> {
        let mut messages = context.to_vec();
        messages.push(ConversationMessage::user(text));

        let request = self.request(messages, tools);
        let completion = self.complete(request).await?;

        Ok(AssistantReply {
            message: completion.content.unwrap_or_default(),
            tool_calls: if completion.tool_calls.is_empty() {
                None
            } else {
                Some(completion.tool_calls)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InlineSource;
    use crate::message::StreamChunk;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ── Stubs ───────────────────────────────────────────────────────

    struct StubTransport {
        reply: TransportReply,
        seen: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    impl StubTransport {
        fn with_body(body: &str) -> Self {
            Self {
                reply: TransportReply {
                    status: 200,
                    body: body.into(),
                },
                seen: Mutex::new(Vec::new()),
            }
        }

        fn with_status(status: u16, body: &str) -> Self {
            Self {
                reply: TransportReply {
                    status,
                    body: body.into(),
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn execute(
            &self,
            url: &str,
            nonce: &str,
            request: &WireRequest,
        ) -> Result<TransportReply, ChatCompletionError> {
            self.seen.lock().unwrap().push((
                url.into(),
                nonce.into(),
                serde_json::to_value(request).unwrap(),
            ));
            Ok(self.reply.clone())
        }

        async fn execute_stream(
            &self,
            _url: &str,
            _nonce: &str,
            _request: &WireRequest,
        ) -> Result<ByteStream, ChatCompletionError> {
            unimplemented!("streaming not stubbed here")
        }
    }

    /// Transport yielding a scripted SSE byte sequence.
    struct ScriptedStream {
        chunks: Mutex<Option<Vec<Result<Bytes, ChatCompletionError>>>>,
    }

    impl ScriptedStream {
        fn new(chunks: Vec<Result<Bytes, ChatCompletionError>>) -> Self {
            Self {
                chunks: Mutex::new(Some(chunks)),
            }
        }

        fn from_lines(lines: &[&str]) -> Self {
            Self::new(
                lines
                    .iter()
                    .map(|l| Ok(Bytes::from(format!("data: {l}\n\n"))))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl Transport for ScriptedStream {
        async fn execute(
            &self,
            _url: &str,
            _nonce: &str,
            _request: &WireRequest,
        ) -> Result<TransportReply, ChatCompletionError> {
            unimplemented!("non-streaming not stubbed here")
        }

        async fn execute_stream(
            &self,
            _url: &str,
            _nonce: &str,
            _request: &WireRequest,
        ) -> Result<ByteStream, ChatCompletionError> {
            let chunks = self.chunks.lock().unwrap().take().expect("stream opened twice");
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn test_settings() -> Arc<InlineSource> {
        Arc::new(InlineSource(serde_json::json!({
            "nonce": "test-nonce",
            "restUrl": "https://site/wp-json/assistant/v1/",
            "homeUrl": "https://site",
            "currentUser": {}
        })))
    }

    fn client_with(transport: Arc<dyn Transport>) -> ChatCompletionClient {
        ChatCompletionClient::with_parts(transport, test_settings(), ClientOptions::default())
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    // ── Non-streaming ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_message_plain_text() {
        let transport = Arc::new(StubTransport::with_body(
            r#"{"choices":[{"message":{"content":"Sure, adding a section."}}]}"#,
        ));
        let client = client_with(transport.clone());

        let reply = client.send_message("Add a section", &[], &[]).await.unwrap();
        assert_eq!(reply.message, "Sure, adding a section.");
        assert!(reply.tool_calls.is_none());

        let seen = transport.seen.lock().unwrap();
        let (url, nonce, body) = &seen[0];
        assert_eq!(url, "https://site/wp-json/assistant/v1/ai");
        assert_eq!(nonce, "test-nonce");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Add a section");
        // No tools: tool_choice and tools stay off the wire.
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn test_send_message_with_tools_sets_auto_choice() {
        let transport = Arc::new(StubTransport::with_body(
            r#"{"choices":[{"message":{"content":"ok"}}]}"#,
        ));
        let client = client_with(transport.clone());
        let tools = vec![ToolDescriptor {
            name: "insert_block".into(),
            description: "Insert a block".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];

        client.send_message("hi", &[], &tools).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let body = &seen[0].2;
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "insert_block");
    }

    #[tokio::test]
    async fn test_zero_choices_is_an_error_without_status() {
        let transport = Arc::new(StubTransport::with_body(r#"{"choices": []}"#));
        let client = client_with(transport);

        let err = client.send_message("hi", &[], &[]).await.unwrap_err();
        assert!(err.message.contains("no choices"));
        assert!(err.status.is_none());
    }

    #[tokio::test]
    async fn test_non_2xx_preserves_status_and_code() {
        let transport = Arc::new(StubTransport::with_status(
            403,
            r#"{"error":{"message":"Invalid nonce","code":"rest_cookie_invalid_nonce"}}"#,
        ));
        let client = client_with(transport);

        let err = client.send_message("hi", &[], &[]).await.unwrap_err();
        assert_eq!(err.status, Some(403));
        assert_eq!(err.code.as_deref(), Some("rest_cookie_invalid_nonce"));
        assert_eq!(err.message, "Invalid nonce");
    }

    #[tokio::test]
    async fn test_complete_returns_tool_calls() {
        let transport = Arc::new(StubTransport::with_body(
            r#"{"choices":[{"message":{"content":null,"tool_calls":[
                {"id":"call_1","type":"function","function":{"name":"insert_block","arguments":"{\"html\":\"<p>x</p>\"}"}},
                {"id":"call_2","type":"function","function":{"name":"broken","arguments":"{oops"}}
            ]}}]}"#,
        ));
        let client = client_with(transport);

        let reply = client.send_message("add it", &[], &[]).await.unwrap();
        assert_eq!(reply.message, "");
        // The malformed call is skipped, not fatal.
        let calls = reply.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "insert_block");
        assert_eq!(calls[0].arguments["html"], "<p>x</p>");
    }

    // ── Settings caching ────────────────────────────────────────────

    #[tokio::test]
    async fn test_settings_resolved_once_per_instance() {
        struct CountingSource(AtomicUsize);
        impl crate::config::SettingsSource for CountingSource {
            fn load(&self) -> Option<serde_json::Value> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Some(serde_json::json!({ "nonce": "n", "restUrl": "u/" }))
            }
        }

        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let client = ChatCompletionClient::with_parts(
            Arc::new(StubTransport::with_body(r#"{"choices":[]}"#)),
            source.clone(),
            ClientOptions::default(),
        );

        let first = client.settings().clone();
        let second = client.settings().clone();
        assert_eq!(first.nonce, second.nonce);
        assert_eq!(source.0.load(Ordering::SeqCst), 1);

        // A fresh instance re-resolves.
        let other = ChatCompletionClient::with_parts(
            Arc::new(StubTransport::with_body(r#"{"choices":[]}"#)),
            source.clone(),
            ClientOptions::default(),
        );
        other.settings();
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
    }

    // ── Streaming ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_streaming_content_and_completion() {
        let transport = Arc::new(ScriptedStream::from_lines(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"Sure, "},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"adding it."},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]));
        let client = client_with(transport);

        let events = collect(client.stream_completion(client.request(vec![], &[]))).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            StreamEvent::Chunk(StreamChunk::Content(c)) if c == "Sure, "
        ));
        assert!(matches!(
            &events[1],
            StreamEvent::Chunk(StreamChunk::Content(c)) if c == "adding it."
        ));
        match &events[2] {
            StreamEvent::Completed { message, tool_calls } => {
                assert_eq!(message, "Sure, adding it.");
                assert!(tool_calls.is_none());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_reassembles_split_tool_arguments() {
        let transport = Arc::new(ScriptedStream::from_lines(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"insert_block","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}},{"index":1,"id":"call_2","function":{"name":"refresh","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]));
        let client = client_with(transport);

        let events = collect(client.stream_completion(client.request(vec![], &[]))).await;

        // Three tool-call snapshots, then completion.
        let snapshots: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Chunk(StreamChunk::ToolCalls(_))))
            .collect();
        assert_eq!(snapshots.len(), 3);

        match events.last().unwrap() {
            StreamEvent::Completed { message, tool_calls } => {
                assert_eq!(message, "");
                let calls = tool_calls.as_ref().unwrap();
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].name, "insert_block");
                assert_eq!(calls[0].arguments["a"], 1);
                assert_eq!(calls[1].id, "call_2");
                assert!(calls[1].arguments.is_empty());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_stops_at_first_finish_reason() {
        let transport = Arc::new(ScriptedStream::from_lines(&[
            r#"{"choices":[{"delta":{"content":"done"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[{"delta":{"content":"late token"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        ]));
        let client = client_with(transport);

        let events = collect(client.stream_completion(client.request(vec![], &[]))).await;
        let completions = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Completed { .. }))
            .count();
        assert_eq!(completions, 1);
        match &events[1] {
            StreamEvent::Completed { message, .. } => assert_eq!(message, "done"),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_streaming_failure_mid_iteration() {
        let transport = Arc::new(ScriptedStream::new(vec![
            Ok(Bytes::from(
                "data: {\"choices\":[{\"delta\":{\"content\":\"par\"},\"finish_reason\":null}]}\n\n",
            )),
            Err(ChatCompletionError::new("connection reset")),
        ]));
        let client = client_with(transport);

        let events = collect(client.stream_completion(client.request(vec![], &[]))).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::Chunk(StreamChunk::Content(_))));
        match &events[1] {
            StreamEvent::Failed(e) => assert!(e.message.contains("connection reset")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_setup_failure_reports_failed() {
        struct FailingTransport;
        #[async_trait]
        impl Transport for FailingTransport {
            async fn execute(
                &self,
                _url: &str,
                _nonce: &str,
                _request: &WireRequest,
            ) -> Result<TransportReply, ChatCompletionError> {
                unimplemented!()
            }
            async fn execute_stream(
                &self,
                _url: &str,
                _nonce: &str,
                _request: &WireRequest,
            ) -> Result<ByteStream, ChatCompletionError> {
                Err(ChatCompletionError::with_status("Forbidden", 403, None))
            }
        }

        let client = client_with(Arc::new(FailingTransport));
        let events = collect(client.stream_completion(client.request(vec![], &[]))).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Failed(e) => assert_eq!(e.status, Some(403)),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_malformed_payload_fails_once() {
        let transport = Arc::new(ScriptedStream::from_lines(&[
            r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":null}]}"#,
            "{not json at all",
        ]));
        let client = client_with(transport);

        let events = collect(client.stream_completion(client.request(vec![], &[]))).await;
        let failures = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Failed(_)))
            .count();
        assert_eq!(failures, 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, StreamEvent::Completed { .. })));
    }
}
