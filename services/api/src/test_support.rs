//! Shared fixtures for the service tests: a scripted LLM and an app backed by
//! temporary SQLite files.

use crate::{
    agent_store::AgentStore,
    auth::AuthService,
    config::{Config, Provider},
    db::Db,
    models::{RegisterPayload, User},
    router::create_router,
    state::AppState,
};
use anyhow::{Result, bail};
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestMessage, ChatCompletionTool,
    ChatCompletionToolType, FunctionCall,
};
use async_trait::async_trait;
use axum::Router;
use grammar_tutor_core::{
    curriculum::Curriculum,
    llm_client::{LLMClient, LLMStream, LLMStreamEvent, TokenUsage},
    memory::MockMemoryService,
    session_store::SessionStore,
};
use std::{collections::VecDeque, sync::Arc};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::Level;

const TEST_SYSTEM_PROMPT: &str =
    "You teach {current_topic} to {user_name}. Mode: {current_teaching_mode}.";

/// Usage reported at the end of every scripted round.
pub const ROUND_USAGE: TokenUsage = TokenUsage {
    input_tokens: 60,
    output_tokens: 7,
};

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ChatCompletionMessageToolCall {
    ChatCompletionMessageToolCall {
        id: id.to_string(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

/// A round in which the model answers with `chunks`.
pub fn text_round(chunks: &[&str]) -> Vec<LLMStreamEvent> {
    let mut events: Vec<LLMStreamEvent> = chunks
        .iter()
        .map(|c| LLMStreamEvent::TextChunk(c.to_string()))
        .collect();
    events.push(LLMStreamEvent::Usage(ROUND_USAGE));
    events
}

/// A round in which the model only requests `calls`.
pub fn tool_round(calls: Vec<ChatCompletionMessageToolCall>) -> Vec<LLMStreamEvent> {
    vec![
        LLMStreamEvent::ToolCalls(calls),
        LLMStreamEvent::Usage(ROUND_USAGE),
    ]
}

/// A round whose request fails before anything is streamed.
pub fn failing_round() -> Vec<LLMStreamEvent> {
    Vec::new()
}

/// What the service sent for one round.
pub struct RecordedRequest {
    pub messages: Vec<ChatCompletionRequestMessage>,
    pub tool_count: usize,
}

/// Plays back queued rounds in order. Once the script runs out every
/// request gets a short text answer.
pub struct ScriptedLLMClient {
    rounds: Mutex<VecDeque<Vec<LLMStreamEvent>>>,
    pub requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLLMClient {
    pub fn new(rounds: Vec<Vec<LLMStreamEvent>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn stream_chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMStream> {
        self.requests.lock().await.push(RecordedRequest {
            messages,
            tool_count: tools.len(),
        });
        let round = self
            .rounds
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| text_round(&["Let's practise."]));
        if round.is_empty() {
            bail!("provider unavailable");
        }
        let events: Vec<Result<LLMStreamEvent, OpenAIError>> = round.into_iter().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub llm: Arc<ScriptedLLMClient>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new(rounds: Vec<Vec<LLMStreamEvent>>) -> Self {
        let dir = TempDir::new().unwrap();
        let database_url = format!("sqlite://{}", dir.path().join("database.db").display());
        let agent_database_url = format!("sqlite://{}", dir.path().join("memory.db").display());

        let db = Arc::new(Db::connect(&database_url).await.unwrap());
        db.run_migrations().await.unwrap();
        let agent_store = Arc::new(AgentStore::connect(&agent_database_url).await.unwrap());
        agent_store.run_migrations().await.unwrap();

        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url,
            agent_database_url,
            provider: Provider::OpenAI,
            llm_api_key: "test-key".to_string(),
            chat_model: "test-model".to_string(),
            log_level: Level::DEBUG,
            prompts_path: "./prompts".into(),
            history_turns: 10,
            password_hash_cost: 4,
            max_cached_sessions: 64,
        };

        let llm = Arc::new(ScriptedLLMClient::new(rounds));
        let state = Arc::new(AppState {
            auth: Arc::new(AuthService::new(db.clone(), config.password_hash_cost)),
            sessions: Arc::new(SessionStore::new(
                agent_store.clone(),
                Curriculum::grammar(),
                64,
            )),
            db,
            agent_store,
            llm_client: llm.clone(),
            memory_service: Arc::new(MockMemoryService),
            system_prompt: Arc::new(TEST_SYSTEM_PROMPT.to_string()),
            config: Arc::new(config),
        });

        Self {
            state,
            llm,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub async fn register_user(&self, username: &str) -> User {
        let api_key = self
            .state
            .auth
            .register(&RegisterPayload {
                username: username.to_string(),
                password: "pw".to_string(),
                native_language: "Malayalam".to_string(),
                lang_code: "Mal".to_string(),
            })
            .await
            .unwrap();
        self.state
            .auth
            .authenticate(Some(api_key.as_str()))
            .await
            .unwrap()
    }
}
