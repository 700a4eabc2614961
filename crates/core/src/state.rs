//! Tutoring State
//!
//! The progress of one session through the curriculum, plus the mutations the
//! tutor's tools are allowed to make to it.

use crate::curriculum::{COMPLETED_MARKER, Curriculum, PerformanceLevel, TeachingMode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Errors raised when a state mutation is given an invalid argument.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StateError {
    #[error("Score delta must be a finite, non-negative number, got {0}")]
    InvalidScore(f64),
    #[error("{0}")]
    InvalidLevel(String),
}

/// Who the tutor is talking to. Bound into the state at the start of each turn.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq, Default)]
pub struct LearnerProfile {
    pub user_id: i64,
    pub user_name: String,
    pub native_language: String,
    pub lang_code: String,
    pub session_id: String,
}

/// Outcome of `TutorState::advance_subtopic`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubtopicAdvance {
    Moved(String),
    Completed,
}

/// Tutoring progress for a single session.
///
/// The LLM reads this through the system prompt and changes it only through
/// the tools in [`crate::agent::TutorService`].
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct TutorState {
    pub current_topic: String,
    pub sub_topics: Vec<String>,
    pub current_sub_topic: String,
    pub sub_topic_index: usize,
    pub current_teaching_mode: TeachingMode,
    pub exercise_rounds_count: u32,
    pub level: PerformanceLevel,
    pub current_performance_score: f64,
    #[serde(default)]
    pub profile: Option<LearnerProfile>,
}

impl TutorState {
    /// Fresh state positioned at the first subtopic of `curriculum`.
    pub fn new(curriculum: &Curriculum) -> Self {
        let current_sub_topic = curriculum
            .subtopics
            .first()
            .cloned()
            .unwrap_or_else(|| COMPLETED_MARKER.to_string());
        Self {
            current_topic: curriculum.topic.clone(),
            sub_topics: curriculum.subtopics.clone(),
            current_sub_topic,
            sub_topic_index: 0,
            current_teaching_mode: TeachingMode::default(),
            exercise_rounds_count: 0,
            level: PerformanceLevel::default(),
            current_performance_score: 0.0,
            profile: None,
        }
    }

    pub fn bind_profile(&mut self, profile: LearnerProfile) {
        self.profile = Some(profile);
    }

    pub fn is_completed(&self) -> bool {
        self.current_sub_topic == COMPLETED_MARKER
    }

    pub fn switch_mode(&mut self, mode: TeachingMode) {
        self.current_teaching_mode = mode;
    }

    /// Moves to the next subtopic, or marks the curriculum complete when
    /// already at the last one. The index never leaves the subtopic range.
    pub fn advance_subtopic(&mut self) -> SubtopicAdvance {
        if self.sub_topic_index + 1 < self.sub_topics.len() {
            self.sub_topic_index += 1;
            self.current_sub_topic = self.sub_topics[self.sub_topic_index].clone();
            SubtopicAdvance::Moved(self.current_sub_topic.clone())
        } else {
            self.current_sub_topic = COMPLETED_MARKER.to_string();
            SubtopicAdvance::Completed
        }
    }

    pub fn increment_round_count(&mut self) -> u32 {
        self.exercise_rounds_count = self.exercise_rounds_count.saturating_add(1);
        self.exercise_rounds_count
    }

    pub fn reset_round_count(&mut self) {
        self.exercise_rounds_count = 0;
    }

    pub fn add_score(&mut self, delta: f64) -> Result<f64, StateError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(StateError::InvalidScore(delta));
        }
        self.current_performance_score += delta;
        Ok(self.current_performance_score)
    }

    pub fn reset_score(&mut self) {
        self.current_performance_score = 0.0;
    }

    pub fn set_level(&mut self, level: &str) -> Result<PerformanceLevel, StateError> {
        let level = level
            .parse::<PerformanceLevel>()
            .map_err(StateError::InvalidLevel)?;
        self.level = level;
        Ok(level)
    }

    pub fn reset_level(&mut self) {
        self.level = PerformanceLevel::Beginner;
    }
}
