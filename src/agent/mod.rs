//! Language-model agent
//!
//! The capture cycle hands the transcript to an [`Agent`] and speaks back the
//! [`AgentResponse::answer`]. Tools are exposed to the model through a [`ToolSet`].

mod email;
mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use email::GmailTools;
pub use openai::{DEFAULT_AGENT_MODEL, MAX_TOOL_ROUNDS, OpenAiAgent, SYSTEM_PROMPT};

/// Structured answer from the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Text to speak
    pub answer: String,

    /// Self-reported confidence in [0, 1]
    #[serde(default)]
    pub confidence: f32,

    /// Where the answer came from, if anywhere in particular
    #[serde(default)]
    pub source: Option<String>,

    /// Whether the agent needs another utterance from the user
    #[serde(default)]
    pub requires_followup: bool,
}

impl AgentResponse {
    /// A plain answer with full confidence and no follow-up
    #[must_use]
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            answer: text.into(),
            confidence: 1.0,
            source: None,
            requires_followup: false,
        }
    }

    /// Mark the response as needing a follow-up turn
    #[must_use]
    pub const fn with_followup(mut self) -> Self {
        self.requires_followup = true;
        self
    }

    /// Clamp confidence into [0, 1]; NaN becomes 0
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

/// Answers a transcribed question
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a response to `question`
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be reached or returns nothing usable
    async fn respond(&self, question: &str) -> Result<AgentResponse>;
}

/// Functions the model may call
#[async_trait]
pub trait ToolSet: Send + Sync {
    /// Tool definitions in chat-completions `tools` format
    fn definitions(&self) -> Vec<serde_json::Value>;

    /// Run tool `name` with JSON-encoded `arguments`
    ///
    /// # Errors
    ///
    /// Returns error if the tool is unknown, the arguments are invalid, or the call fails
    async fn execute(&self, name: &str, arguments: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps_confidence() {
        let mut response = AgentResponse::answer("yes");
        response.confidence = 1.7;
        assert!((response.normalized().confidence - 1.0).abs() < f32::EPSILON);

        let mut response = AgentResponse::answer("no");
        response.confidence = f32::NAN;
        assert!(response.normalized().confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn test_deserialize_defaults() {
        let response: AgentResponse = serde_json::from_str(r#"{"answer":"hi"}"#).unwrap();
        assert_eq!(response.answer, "hi");
        assert!(response.source.is_none());
        assert!(!response.requires_followup);
    }
}
