//! System Prompt Rendering
//!
//! The tutor's instructions live in a Markdown template with `{placeholder}`
//! fields. Each turn the template is filled from the session state, the
//! learner profile and the learner's stored memories.

use crate::curriculum::{PerformanceLevel, TeachingMode, join_names};
use crate::state::TutorState;
use chrono::{DateTime, Utc};

/// Placeholder values used when no profile has been bound yet.
const UNKNOWN: &str = "unknown";

/// Fills `template` with values from `state`, `memories` and `now`.
///
/// Unknown placeholders are left untouched.
pub fn render_system_prompt(
    template: &str,
    state: &TutorState,
    memories: &[String],
    now: DateTime<Utc>,
) -> String {
    let profile = state.profile.clone().unwrap_or_default();
    let user_name = non_empty(&profile.user_name);
    let native_language = non_empty(&profile.native_language);
    let lang_code = non_empty(&profile.lang_code);
    let session_id = non_empty(&profile.session_id);

    let vars: Vec<(&str, String)> = vec![
        ("user_name", user_name.to_string()),
        ("NATIVE_LANGUAGE", native_language.to_string()),
        ("LANG_CODE", lang_code.to_string()),
        ("current_user_id", profile.user_id.to_string()),
        ("current_session_id", session_id.to_string()),
        ("current_topic", state.current_topic.clone()),
        ("sub_topics", join_names(state.sub_topics.iter().map(String::as_str))),
        ("current_sub_topic", state.current_sub_topic.clone()),
        ("sub_topic_index", state.sub_topic_index.to_string()),
        (
            "teaching_modes",
            join_names(TeachingMode::ALL.iter().map(|m| m.as_str())),
        ),
        (
            "current_teaching_mode",
            state.current_teaching_mode.to_string(),
        ),
        (
            "exercise_rounds_count",
            state.exercise_rounds_count.to_string(),
        ),
        (
            "all_performance_level",
            join_names(PerformanceLevel::ALL.iter().map(|l| l.as_str())),
        ),
        ("level", state.level.to_string()),
        (
            "current_performance_score",
            state.current_performance_score.to_string(),
        ),
        ("memories", render_memories(memories)),
        ("current_datetime", now.format("%Y-%m-%d %H:%M UTC").to_string()),
    ];

    vars.iter().fold(template.to_string(), |prompt, (key, value)| {
        prompt.replace(&format!("{{{}}}", key), value)
    })
}

fn non_empty(value: &str) -> &str {
    if value.trim().is_empty() {
        UNKNOWN
    } else {
        value
    }
}

fn render_memories(memories: &[String]) -> String {
    if memories.is_empty() {
        return "No memories about this learner yet.".to_string();
    }
    memories
        .iter()
        .map(|m| format!("- {}", m))
        .collect::<Vec<_>>()
        .join("\n")
}
