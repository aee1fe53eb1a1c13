//! Agent trait — whatever turns an extracted query into an insight.
//!
//! The runtime never looks inside the agent. It hands over the query, a
//! slice of recent transcript for situational context, and the rendered
//! insight history, then awaits a single textual answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Everything the agent receives for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub user_id: String,

    /// The extracted query text
    pub query: String,

    /// Recent transcript preceding the query, already truncated
    pub transcript_context: String,

    /// Prior exchanges rendered as `User: ...\nLLM:...` blocks
    pub insight_history: String,
}

/// The core Agent trait.
///
/// Implementations: OpenAI-compatible chat completions; scripted fakes in tests.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent name (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Produce an insight for the request. May take seconds; never cancelled.
    async fn run(&self, request: AgentRequest) -> Result<String, AgentError>;
}
