//! OpenAI-compatible agent implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/v1/chat/completions`.
//!
//! One query is one non-streaming completion: a system prompt plus a single
//! user message carrying the insight history, the transcript context and the
//! question itself.

use async_trait::async_trait;
use earshot_config::AgentConfig;
use earshot_core::agent::{Agent, AgentRequest};
use earshot_core::error::AgentError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible chat-completions agent.
pub struct OpenAiCompatAgent {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    client: reqwest::Client,
}

impl OpenAiCompatAgent {
    /// Create a new OpenAI-compatible agent.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AgentError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: 512,
            system_prompt: String::new(),
            client,
        })
    }

    /// Build from the `[agent]` config section.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            AgentError::NotConfigured(
                "no API key (set agent.api_key, EARSHOT_API_KEY or OPENAI_API_KEY)".into(),
            )
        })?;

        Ok(Self::new(&config.provider, &config.api_url, api_key, &config.model)?
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_system_prompt(&config.system_prompt))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Render one request as chat messages.
    fn to_api_messages(&self, request: &AgentRequest) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.is_empty() {
            messages.push(ApiMessage {
                role: "system".into(),
                content: self.system_prompt.clone(),
            });
        }

        let mut user = String::new();
        if !request.insight_history.trim().is_empty() {
            user.push_str("Earlier questions and answers:\n");
            user.push_str(&request.insight_history);
            user.push('\n');
        }
        if !request.transcript_context.trim().is_empty() {
            user.push_str("Recent conversation transcript:\n");
            user.push_str(&request.transcript_context);
            user.push_str("\n\n");
        }
        user.push_str("Question: ");
        user.push_str(&request.query);

        messages.push(ApiMessage {
            role: "user".into(),
            content: user,
        });
        messages
    }
}

#[async_trait]
impl Agent for OpenAiCompatAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, request: AgentRequest) -> Result<String, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": self.to_api_messages(&request),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });

        debug!(agent = %self.name, model = %self.model, user_id = %request.user_id, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(AgentError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(AgentError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Agent provider returned error");
            return Err(AgentError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| AgentError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        extract_content(api_response)
    }
}

/// First non-blank choice content, trimmed.
fn extract_content(response: ApiResponse) -> Result<String, AgentError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(AgentError::EmptyResponse)
}

// --- OpenAI API wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
