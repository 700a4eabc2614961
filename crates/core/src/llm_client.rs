use anyhow::Result;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCallChunk,
        ChatCompletionRequestMessage, ChatCompletionStreamOptions, ChatCompletionTool,
        ChatCompletionToolType, CompletionUsage, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse, FunctionCall,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::pin::Pin;

/// Represents a tool call requested by the LLM.
pub type ToolCall = ChatCompletionMessageToolCall;

/// Token counts reported by the provider for one or more requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

impl From<&CompletionUsage> for TokenUsage {
    fn from(usage: &CompletionUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

/// Events yielded while the model answers.
#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    /// A piece of answer text, forwarded as soon as it arrives.
    TextChunk(String),
    /// The tool calls the model requested, complete with arguments.
    /// Sent once, after the model has finished.
    ToolCalls(Vec<ToolCall>),
    /// Sent by providers on the final chunk.
    Usage(TokenUsage),
}

/// A stream of events from one model request.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, OpenAIError>> + Send>>;

/// A generic client for interacting with an LLM.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a streaming chat request. When `tools` is non-empty the model
    /// may answer with text, request tool calls, or both.
    async fn stream_chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMStream>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gemini-2.5-flash").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

/// Builds a streaming request. Usage is requested so the final chunk
/// carries token counts.
pub fn build_stream_request(
    model: &str,
    messages: Vec<ChatCompletionRequestMessage>,
    tools: Vec<ChatCompletionTool>,
) -> Result<CreateChatCompletionRequest> {
    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(model)
        .messages(messages)
        .stream(true)
        .stream_options(ChatCompletionStreamOptions {
            include_usage: true,
        });
    if !tools.is_empty() {
        args.tools(tools).tool_choice("auto");
    }
    Ok(args.build()?)
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn stream_chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMStream> {
        let request = build_stream_request(&self.model, messages, tools)?;
        let stream = self.client.chat().create_stream(request).await?;

        let events = futures::stream::unfold(
            Some((stream, ToolCallAccumulator::default())),
            |state| async move {
                let (mut stream, mut calls) = state?;
                match stream.next().await {
                    Some(Ok(response)) => {
                        let events: Vec<Result<LLMStreamEvent, OpenAIError>> =
                            calls.absorb(&response).into_iter().map(Ok).collect();
                        Some((events, Some((stream, calls))))
                    }
                    Some(Err(e)) => Some((vec![Err(e)], None)),
                    None => Some((calls.finish().into_iter().map(Ok).collect(), None)),
                }
            },
        );
        Ok(Box::pin(events.flat_map(futures::stream::iter)))
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles tool calls that providers split across stream chunks.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAccumulator {
    /// Consumes one chunk and returns the events it completes.
    pub fn absorb(&mut self, response: &CreateChatCompletionStreamResponse) -> Vec<LLMStreamEvent> {
        let mut events = Vec::new();
        if let Some(choice) = response.choices.first() {
            if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
                events.push(LLMStreamEvent::TextChunk(content.clone()));
            }
            for chunk in choice.delta.tool_calls.iter().flatten() {
                self.push(chunk);
            }
        }
        if let Some(usage) = &response.usage {
            events.push(LLMStreamEvent::Usage(TokenUsage::from(usage)));
        }
        events
    }

    fn push(&mut self, chunk: &ChatCompletionMessageToolCallChunk) {
        let call = self.calls.entry(chunk.index).or_default();
        if let Some(id) = chunk.id.as_ref().filter(|id| !id.is_empty()) {
            call.id = id.clone();
        }
        if let Some(function) = &chunk.function {
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.arguments.push_str(arguments);
            }
        }
    }

    /// Emits the assembled tool calls, if any were requested.
    pub fn finish(&mut self) -> Option<LLMStreamEvent> {
        if self.calls.is_empty() {
            return None;
        }
        let calls = std::mem::take(&mut self.calls)
            .into_iter()
            .map(|(index, call)| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    call.id
                },
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                },
            })
            .collect();
        Some(LLMStreamEvent::ToolCalls(calls))
    }
}
