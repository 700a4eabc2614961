//! Contains the logic for one tutoring turn.
//!
//! A turn locks the caller's session, renders the system prompt from the
//! session state and streams the model's answer. Tool calls the model makes
//! along the way run against a working copy of the state; the turn commits
//! that copy and the chat history once the answer is complete.

use crate::{models::ChatHistory, models::MessageRole, models::User, state::AppState};
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    FunctionObjectArgs,
};
use chrono::Utc;
use futures_util::StreamExt;
use grammar_tutor_core::{
    agent::TutorService,
    llm_client::{LLMStreamEvent, TokenUsage, ToolCall},
    prompt::render_system_prompt,
    state::{LearnerProfile, TutorState},
};
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info, instrument, warn};

/// Tool rounds allowed per turn. The request after the last one is made
/// without tools.
const MAX_TOOL_ROUNDS: usize = 5;

/// Events forwarded to a streaming client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    Error(String),
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub usage: TokenUsage,
    pub client_disconnected: bool,
}

/// Each user has a single tutoring session.
pub fn session_id_for(user: &User) -> String {
    format!("{}_session", user.id)
}

/// Runs one tutoring turn for `user`.
///
/// With `chunk_tx`, answer text is forwarded as it arrives. If the receiver
/// goes away the model stream is dropped; tool effects are still committed.
/// The exchange is only written to the chat history when the model answered.
#[instrument(name = "tutor_turn", skip_all, fields(user_id = user.id, session_id = tracing::field::Empty))]
pub async fn run_turn(
    state: &Arc<AppState>,
    user: &User,
    query: &str,
    chunk_tx: Option<&mpsc::Sender<StreamEvent>>,
) -> Result<TurnOutcome> {
    let session_id = session_id_for(user);
    tracing::Span::current().record("session_id", session_id.as_str());

    let mut lease = state.sessions.checkout(&session_id).await?;
    lease.state_mut().bind_profile(LearnerProfile {
        user_id: user.id,
        user_name: user.username.clone(),
        native_language: user.native_language.clone(),
        lang_code: user.lang_code.clone(),
        session_id: session_id.clone(),
    });

    let history = state
        .db
        .recent_chat_messages(user.id, &session_id, state.config.history_turns.saturating_mul(2))
        .await?;
    let memories: Vec<String> = state
        .agent_store
        .list_memories(user.id)
        .await?
        .into_iter()
        .map(|m| m.memory)
        .collect();
    let system_prompt =
        render_system_prompt(&state.system_prompt, lease.state(), &memories, Utc::now());
    let messages = build_messages(system_prompt, &history, query)?;

    let working_state = Arc::new(Mutex::new(lease.state().clone()));
    let tools = ToolSession::start(working_state.clone()).await?;
    let answer = generate_answer(state, &tools, messages, chunk_tx).await;
    tools.shutdown();

    // Tool effects are kept even when the answer itself failed.
    let final_state = working_state.lock().await.clone();
    if final_state.is_completed() && !lease.state().is_completed() {
        info!(topic = %final_state.current_topic, "Learner completed the curriculum");
    }
    lease.commit(final_state).await?;

    let outcome = answer?;
    if outcome.client_disconnected {
        warn!("Client disconnected before the answer finished streaming");
    }
    state
        .db
        .add_chat_message(
            user.id,
            &session_id,
            MessageRole::User,
            query,
            TokenUsage::default(),
        )
        .await?;
    if !outcome.response.is_empty() {
        state
            .db
            .add_chat_message(
                user.id,
                &session_id,
                MessageRole::Assistant,
                &outcome.response,
                outcome.usage,
            )
            .await?;
    }
    drop(lease);
    info!(
        input_tokens = outcome.usage.input_tokens,
        output_tokens = outcome.usage.output_tokens,
        "Turn complete"
    );

    spawn_memory_extraction(state.clone(), user.id, query.to_string());
    Ok(outcome)
}

/// Streams the model's answer, running tool rounds until it replies without
/// calling tools.
async fn generate_answer(
    state: &Arc<AppState>,
    tools: &ToolSession,
    mut messages: Vec<ChatCompletionRequestMessage>,
    chunk_tx: Option<&mpsc::Sender<StreamEvent>>,
) -> Result<TurnOutcome> {
    let definitions = tools.definitions().await?;
    let mut outcome = TurnOutcome {
        response: String::new(),
        usage: TokenUsage::default(),
        client_disconnected: false,
    };

    for round in 0..=MAX_TOOL_ROUNDS {
        let offered = if round < MAX_TOOL_ROUNDS {
            definitions.clone()
        } else {
            Vec::new()
        };
        let mut stream = state.llm_client.stream_chat(messages.clone(), offered).await?;

        let mut round_text = String::new();
        let mut tool_calls = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                LLMStreamEvent::TextChunk(chunk) => {
                    round_text.push_str(&chunk);
                    if !forward(chunk_tx, &chunk).await {
                        outcome.client_disconnected = true;
                        break;
                    }
                }
                LLMStreamEvent::ToolCalls(calls) => tool_calls = calls,
                LLMStreamEvent::Usage(usage) => outcome.usage.add(usage),
            }
        }
        outcome.response.push_str(&round_text);

        if outcome.client_disconnected || tool_calls.is_empty() {
            break;
        }
        debug!(round, count = tool_calls.len(), "Running tool round");
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in &tool_calls {
            results.push(tools.call(call).await);
        }
        messages = append_tool_results(messages, round_text, &tool_calls, results)?;
    }

    Ok(outcome)
}

/// Sends a chunk to the streaming client. Returns false once the client is gone.
async fn forward(chunk_tx: Option<&mpsc::Sender<StreamEvent>>, text: &str) -> bool {
    match chunk_tx {
        Some(tx) if !text.is_empty() => tx.send(StreamEvent::Chunk(text.to_string())).await.is_ok(),
        _ => true,
    }
}

fn build_messages(
    system_prompt: String,
    history: &[ChatHistory],
    query: &str,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()?
            .into(),
    ];
    for msg in history {
        match msg.role {
            MessageRole::User => messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            ),
            MessageRole::Assistant => messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            ),
        };
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(query)
            .build()?
            .into(),
    );
    Ok(messages)
}

fn append_tool_results(
    mut messages: Vec<ChatCompletionRequestMessage>,
    round_text: String,
    tool_calls: &[ToolCall],
    results: Vec<String>,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
    if !round_text.is_empty() {
        assistant.content(round_text);
    }
    messages.push(assistant.tool_calls(tool_calls.to_vec()).build()?.into());
    for (call, result) in tool_calls.iter().zip(results) {
        messages.push(
            ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(call.id.clone())
                .content(result)
                .build()?
                .into(),
        );
    }
    Ok(messages)
}

/// The tutor's MCP tool server running in-process for the length of a turn.
struct ToolSession {
    client: RunningService<RoleClient, ()>,
    server_handle: JoinHandle<()>,
}

impl ToolSession {
    async fn start(state: Arc<Mutex<TutorState>>) -> Result<Self> {
        let service = TutorService::new(state);
        let (server_transport, client_transport) = tokio::io::duplex(4096);

        let server_handle = tokio::spawn(
            async move {
                if let Ok(service) = service.serve(server_transport).await {
                    let _ = service.waiting().await;
                }
            }
            .in_current_span(),
        );
        let client = ().serve(client_transport).await?;
        Ok(Self {
            client,
            server_handle,
        })
    }

    /// The tools in the shape the chat completions API expects.
    async fn definitions(&self) -> Result<Vec<ChatCompletionTool>> {
        self.client
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| {
                Ok(ChatCompletionToolArgs::default()
                    .function(
                        FunctionObjectArgs::default()
                            .name(t.name)
                            .description(t.description.unwrap_or_default())
                            .parameters(serde_json::to_value(&*t.input_schema)?)
                            .build()?,
                    )
                    .build()?)
            })
            .collect::<Result<Vec<_>>>()
    }

    /// Executes one tool call. Failures are returned as text for the model
    /// to read rather than aborting the turn.
    async fn call(&self, call: &ToolCall) -> String {
        info!(tool = %call.function.name, arguments = %call.function.arguments, "Calling tool");
        match self.try_call(call).await {
            Ok(text) => text,
            Err(e) => {
                warn!(tool = %call.function.name, error = ?e, "Tool call failed");
                serde_json::json!({ "error": e.to_string() }).to_string()
            }
        }
    }

    async fn try_call(&self, call: &ToolCall) -> Result<String> {
        let raw_arguments = call.function.arguments.trim();
        let arguments = if raw_arguments.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(raw_arguments)
                    .with_context(|| format!("Malformed arguments for '{}'", call.function.name))?,
            )
        };

        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: call.function.name.clone().into(),
                arguments,
            })
            .await?;

        let text = result
            .content
            .context("Tool call returned no content")?
            .into_iter()
            .filter_map(|content| match content.raw {
                RawContent::Text(text_content) => Some(text_content.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text)
    }

    fn shutdown(self) {
        drop(self.client);
        self.server_handle.abort();
    }
}

fn spawn_memory_extraction(state: Arc<AppState>, user_id: i64, message: String) {
    tokio::spawn(
        async move {
            if let Err(e) = remember(&state, user_id, &message).await {
                warn!(error = ?e, "Memory extraction failed");
            }
        }
        .in_current_span(),
    );
}

async fn remember(state: &AppState, user_id: i64, message: &str) -> Result<()> {
    let known: Vec<String> = state
        .agent_store
        .list_memories(user_id)
        .await?
        .into_iter()
        .map(|m| m.memory)
        .collect();
    let memories = state
        .memory_service
        .extract_memories(message, &known)
        .await?;
    if !memories.is_empty() {
        info!(count = memories.len(), "Storing new learner memories");
        state.agent_store.add_memories(user_id, &memories).await?;
    }
    Ok(())
}
