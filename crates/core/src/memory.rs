//! Learner Memory Extraction
//!
//! After each turn the service asks an LLM which durable facts the learner
//! revealed about themselves (name, goals, recurring mistakes, interests).
//! The facts are stored per user and fed back into later system prompts.

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Defines the contract for any service that can extract learner memories.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Returns new facts about the learner found in `user_message`.
    ///
    /// # Arguments
    ///
    /// * `user_message` - The learner's latest message.
    /// * `known` - Memories already stored for this learner.
    async fn extract_memories(&self, user_message: &str, known: &[String]) -> Result<Vec<String>>;
}

/// An implementation of `MemoryService` that uses an OpenAI-compatible API.
pub struct LLMMemoryService {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: HashMap<String, String>,
}

impl LLMMemoryService {
    /// Creates a new LLM-based memory service.
    ///
    /// `prompts` must contain an `"extract_memories"` template with the
    /// `{known_memories}` and `{message}` placeholders.
    pub fn new(config: OpenAIConfig, model: String, prompts: HashMap<String, String>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
        }
    }
}

#[async_trait]
impl MemoryService for LLMMemoryService {
    async fn extract_memories(&self, user_message: &str, known: &[String]) -> Result<Vec<String>> {
        let prompt_template = self
            .prompts
            .get("extract_memories")
            .context("Missing prompt template: 'extract_memories'")?;
        let known_memories = if known.is_empty() {
            "(none)".to_string()
        } else {
            known
                .iter()
                .map(|m| format!("- {}", m))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = prompt_template
            .replace("{known_memories}", &known_memories)
            .replace("{message}", user_message);

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You maintain short notes about a language learner.")
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let answer = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;

        Ok(new_memories(parse_memory_list(answer), known))
    }
}

/// A `MemoryService` that never remembers anything. Used in tests and when
/// memory extraction is disabled.
pub struct MockMemoryService;

#[async_trait]
impl MemoryService for MockMemoryService {
    async fn extract_memories(&self, _user_message: &str, _known: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Collects `-`, `*` or numbered list items from an LLM answer.
/// An answer of `NONE` yields nothing.
pub fn parse_memory_list(answer: &str) -> Vec<String> {
    answer
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let item = if let Some(rest) = line.strip_prefix(['-', '*']) {
                rest
            } else {
                let digits = line.find(|c: char| !c.is_ascii_digit())?;
                if digits == 0 {
                    return None;
                }
                line[digits..].strip_prefix(['.', ')'])?
            };
            let item = item.trim();
            (!item.is_empty() && !item.eq_ignore_ascii_case("none")).then(|| item.to_string())
        })
        .collect()
}

/// Drops candidates already present in `known` or repeated, ignoring case.
pub fn new_memories(candidates: Vec<String>, known: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = known.iter().map(|m| m.to_lowercase()).collect();
    candidates
        .into_iter()
        .filter(|candidate| {
            let key = candidate.to_lowercase();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        })
        .collect()
}
