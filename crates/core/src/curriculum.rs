//! Grammar Curriculum
//!
//! The fixed curriculum the tutor walks through, together with the two
//! teaching modes and the ordered performance tiers the LLM may assign.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker stored in `current_sub_topic` once the last subtopic has been left.
pub const COMPLETED_MARKER: &str = "All sub-topics completed.";

/// Default main topic taught by the service.
pub const GRAMMAR_TOPIC: &str = "Grammar";

/// Default ordered grammar subtopics.
pub const GRAMMAR_SUBTOPICS: [&str; 10] = [
    "sentence patterns",
    "noun phrases",
    "verb phrases",
    "tenses",
    "parts of speech",
    "subject-predicate",
    "phrases and clauses",
    "types of sentences",
    "articles",
    "determiners",
];

/// The conversational strategy the tutor is currently following.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TeachingMode {
    #[default]
    Explain,
    Examine,
}

impl TeachingMode {
    pub const ALL: [TeachingMode; 2] = [TeachingMode::Explain, TeachingMode::Examine];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeachingMode::Explain => "EXPLAIN",
            TeachingMode::Examine => "EXAMINE",
        }
    }
}

impl fmt::Display for TeachingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learner proficiency for the current subtopic, lowest first.
///
/// The derived ordering follows declaration order, so `Beginner < Expert`.
#[derive(
    Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PerformanceLevel {
    #[default]
    Beginner,
    Average,
    Good,
    Better,
    Best,
    Expert,
}

impl PerformanceLevel {
    pub const ALL: [PerformanceLevel; 6] = [
        PerformanceLevel::Beginner,
        PerformanceLevel::Average,
        PerformanceLevel::Good,
        PerformanceLevel::Better,
        PerformanceLevel::Best,
        PerformanceLevel::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceLevel::Beginner => "BEGINNER",
            PerformanceLevel::Average => "AVERAGE",
            PerformanceLevel::Good => "GOOD",
            PerformanceLevel::Better => "BETTER",
            PerformanceLevel::Best => "BEST",
            PerformanceLevel::Expert => "EXPERT",
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        PerformanceLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "Unknown performance level '{}'. Expected one of: {}",
                    s,
                    join_names(PerformanceLevel::ALL.iter().map(|l| l.as_str()))
                )
            })
    }
}

/// A main topic and its ordered list of subtopics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Curriculum {
    pub topic: String,
    pub subtopics: Vec<String>,
}

impl Curriculum {
    pub fn new(topic: impl Into<String>, subtopics: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            subtopics,
        }
    }

    /// The English grammar curriculum taught by default.
    pub fn grammar() -> Self {
        Self::new(
            GRAMMAR_TOPIC,
            GRAMMAR_SUBTOPICS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl Default for Curriculum {
    fn default() -> Self {
        Self::grammar()
    }
}

/// Renders names as `A, B, C` for prompts and error messages.
pub fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}
