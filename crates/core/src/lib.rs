//! Grammar Tutor Core
//!
//! Domain logic shared by the tutoring services: the curriculum, per-session
//! tutoring state and the MCP tools that mutate it, the LLM client, learner
//! memory extraction and system prompt rendering. Nothing here knows about
//! HTTP or SQL.

pub mod agent;
pub mod curriculum;
pub mod llm_client;
pub mod memory;
pub mod prompt;
pub mod session_store;
pub mod state;
