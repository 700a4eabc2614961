//! Tutor Tool Service
//!
//! Exposes the tutoring state mutations as Model Context Protocol (MCP) tools.
//! The LLM decides when to call them; each call mutates the session's
//! [`TutorState`] and returns a short confirmation the model can read back.

use crate::curriculum::{PerformanceLevel, TeachingMode};
use crate::state::{SubtopicAdvance, TutorState};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Arguments for `add_score`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct AddScoreArgs {
    /// Points to add: 1 for a correct answer, 0.5 for a partially correct one.
    #[schemars(description = "Points to add: 1 for a correct answer, 0.5 for a partial answer")]
    pub score: f64,
}

/// Arguments for `set_level`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct SetLevelArgs {
    #[schemars(
        description = "The learner's new level: BEGINNER, AVERAGE, GOOD, BETTER, BEST or EXPERT"
    )]
    pub new_level: String,
}

/// MCP server wrapping one session's tutoring state.
pub struct TutorService {
    pub state: Arc<Mutex<TutorState>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for TutorService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Tools for tracking an English grammar tutoring session.".to_string(),
            ),
            ..Default::default()
        }
    }
}

#[tool_router]
impl TutorService {
    pub fn new(state: Arc<Mutex<TutorState>>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Get the current tutoring state: subtopic, teaching mode, exercise rounds, level and score."
    )]
    pub async fn get_session_state(&self) -> Result<String, String> {
        info!("Executing tool 'get_session_state'");
        let state = self.state.lock().await;
        serde_json::to_string(&*state).map_err(|e| format!("Failed to serialize state: {}", e))
    }

    #[tool(description = "Switch to EXAMINE mode to test the learner's knowledge.")]
    pub async fn switch_to_examine(&self) -> Result<String, String> {
        info!("Executing tool 'switch_to_examine'");
        self.state.lock().await.switch_mode(TeachingMode::Examine);
        Ok("Teaching mode switched to EXAMINE.".to_string())
    }

    #[tool(description = "Switch to EXPLAIN mode to teach the current subtopic.")]
    pub async fn switch_to_explain(&self) -> Result<String, String> {
        info!("Executing tool 'switch_to_explain'");
        self.state.lock().await.switch_mode(TeachingMode::Explain);
        Ok("Teaching mode switched to EXPLAIN.".to_string())
    }

    #[tool(description = "Advance to the next subtopic in the curriculum.")]
    pub async fn advance_subtopic(&self) -> Result<String, String> {
        info!("Executing tool 'advance_subtopic'");
        let mut state = self.state.lock().await;
        match state.advance_subtopic() {
            SubtopicAdvance::Moved(name) => {
                info!(subtopic = %name, index = state.sub_topic_index, "Moved to next subtopic");
                Ok(format!("Moved to sub-topic: {}", name))
            }
            SubtopicAdvance::Completed => {
                info!("Curriculum completed");
                Ok(format!("Moved to sub-topic: {}", state.current_sub_topic))
            }
        }
    }

    #[tool(description = "Increment the exercise rounds counter. Only used in EXAMINE mode.")]
    pub async fn increment_round_count(&self) -> Result<String, String> {
        info!("Executing tool 'increment_round_count'");
        let mut state = self.state.lock().await;
        if state.current_teaching_mode != TeachingMode::Examine {
            warn!(mode = %state.current_teaching_mode, "Round counted outside EXAMINE mode");
        }
        let rounds = state.increment_round_count();
        Ok(format!("Exercise rounds count updated to {}.", rounds))
    }

    #[tool(description = "Reset the exercise rounds counter to 0.")]
    pub async fn reset_round_count(&self) -> Result<String, String> {
        info!("Executing tool 'reset_round_count'");
        self.state.lock().await.reset_round_count();
        Ok("Exercise rounds count reset to 0.".to_string())
    }

    #[tool(description = "Add points to the learner's performance score.")]
    pub async fn add_score(&self, args: Parameters<AddScoreArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'add_score'");
        let mut state = self.state.lock().await;
        let score = state.add_score(args.0.score).map_err(|e| e.to_string())?;
        Ok(format!("Score updated to {}.", score))
    }

    #[tool(description = "Reset the learner's performance score to 0.")]
    pub async fn reset_score(&self) -> Result<String, String> {
        info!("Executing tool 'reset_score'");
        self.state.lock().await.reset_score();
        Ok("Score reset to 0.".to_string())
    }

    #[tool(description = "Set the learner's understanding level for the current subtopic.")]
    pub async fn set_level(&self, args: Parameters<SetLevelArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'set_level'");
        let mut state = self.state.lock().await;
        let level = state
            .set_level(&args.0.new_level)
            .map_err(|e| e.to_string())?;
        Ok(format!("Understanding level updated to {}.", level))
    }

    #[tool(description = "Reset the learner's level to BEGINNER.")]
    pub async fn reset_level(&self) -> Result<String, String> {
        info!("Executing tool 'reset_level'");
        self.state.lock().await.reset_level();
        Ok(format!("Level reset to {}.", PerformanceLevel::Beginner))
    }
}
