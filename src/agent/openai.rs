//! `OpenAI` chat completions agent

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agent::{Agent, AgentResponse, ToolSet};
use crate::{Error, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Model used when none is configured
pub const DEFAULT_AGENT_MODEL: &str = "gpt-4o";

/// Upper bound on tool call rounds per question
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Persona given to the model
pub const SYSTEM_PROMPT: &str = "You are a helpful voice assistant that provides clear, accurate answers. \
Answer conversationally and keep it short: your reply is spoken aloud. \
If you are not sure about something, say so and report a lower confidence. \
Set requires_followup when you need more information from the user to finish the request.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool(id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Agent backed by the `OpenAI` chat completions API
pub struct OpenAiAgent {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    tools: Option<Arc<dyn ToolSet>>,
}

impl OpenAiAgent {
    /// Create an agent using `model`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for agent".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            tools: None,
        })
    }

    /// Point requests at a different host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Give the model tools to call
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolSet>) -> Self {
        self.tools = Some(tools);
        self
    }

    fn response_format() -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": "assistant_response",
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": {
                        "answer": { "type": "string" },
                        "confidence": { "type": "number" },
                        "source": { "type": ["string", "null"] },
                        "requires_followup": { "type": "boolean" }
                    },
                    "required": ["answer", "confidence", "source", "requires_followup"],
                    "additionalProperties": false
                }
            }
        })
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Choice> {
        let mut request = json!({
            "model": self.model,
            "messages": messages,
            "response_format": Self::response_format(),
        });
        if let Some(tools) = &self.tools {
            request["tools"] = Value::Array(tools.definitions());
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("OpenAI chat error {status}: {body}")));
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Agent("no choices in response".to_string()))
    }
}

/// Parse the model's structured reply, falling back to the raw text
fn parse_response(content: &str) -> AgentResponse {
    match serde_json::from_str::<AgentResponse>(content) {
        Ok(response) => response.normalized(),
        Err(e) => {
            tracing::debug!(error = %e, "agent reply was not structured, using raw text");
            AgentResponse {
                answer: content.trim().to_string(),
                confidence: 0.0,
                source: None,
                requires_followup: false,
            }
        }
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    async fn respond(&self, question: &str) -> Result<AgentResponse> {
        let mut messages = vec![
            ChatMessage::new("system", SYSTEM_PROMPT),
            ChatMessage::new("user", question),
        ];

        for round in 0..MAX_TOOL_ROUNDS {
            let choice = self.complete(&messages).await?;

            let tool_calls = choice.message.tool_calls.clone().unwrap_or_default();
            let wants_tools = choice.finish_reason.as_deref() == Some("tool_calls")
                || !tool_calls.is_empty();

            if !wants_tools {
                let content = choice.message.content.unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(Error::Agent("empty response from model".to_string()));
                }
                return Ok(parse_response(&content));
            }

            let Some(tools) = &self.tools else {
                return Err(Error::Agent(
                    "model requested tools but none are configured".to_string(),
                ));
            };

            messages.push(choice.message);
            for call in &tool_calls {
                tracing::info!(
                    round,
                    tool = %call.function.name,
                    "executing tool"
                );
                let result = match tools
                    .execute(&call.function.name, &call.function.arguments)
                    .await
                {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(tool = %call.function.name, error = %e, "tool failed");
                        format!("Error: {e}")
                    }
                };
                messages.push(ChatMessage::tool(&call.id, result));
            }
        }

        Err(Error::Agent(format!(
            "no answer after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }
}
