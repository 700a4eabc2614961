//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like database pools, the session store and service clients.

use crate::{agent_store::AgentStore, auth::AuthService, config::Config, db::Db};
use grammar_tutor_core::{
    llm_client::LLMClient, memory::MemoryService, session_store::SessionStore,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub agent_store: Arc<AgentStore>,
    pub auth: Arc<AuthService>,
    pub sessions: Arc<SessionStore>,
    pub llm_client: Arc<dyn LLMClient>,
    pub memory_service: Arc<dyn MemoryService>,
    pub system_prompt: Arc<String>,
    pub config: Arc<Config>,
}
