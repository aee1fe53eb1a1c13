//! Domain value objects shared by the store, the runtime, and the CLI.
//!
//! Everything here is owned by the store. The runtime only reads windows of
//! transcript, flips a user's pending state, and appends queries and insights.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier returned when a query is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user with a pending wake word.
///
/// `last_wake_word_time` is when the wake word was *detected*, which lags
/// the moment it was actually spoken by up to one discovery window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub last_wake_word_time: DateTime<Utc>,
}

/// A single piece of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub user_id: String,

    /// Device that captured the audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    pub text: String,

    /// Transcription language, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl TranscriptFragment {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: None,
            text: text.into(),
            language: None,
            timestamp,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// The concatenated text of a lookback window.
///
/// `language` and `device_id` come from the newest fragment in the window
/// and are opaque to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWindow {
    pub text: String,
    pub language: Option<String>,
    pub device_id: Option<String>,
}

impl TranscriptWindow {
    /// Join fragments (oldest first) the way every store renders a window.
    pub fn from_fragments<'a, I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = &'a TranscriptFragment>,
    {
        let mut window = TranscriptWindow::default();
        let mut parts: Vec<&str> = Vec::new();
        for fragment in fragments {
            parts.push(fragment.text.trim());
            window.language = fragment.language.clone();
            window.device_id = fragment.device_id.clone();
        }
        window.text = parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        window
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// One remembered exchange, used as conversational memory for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightHistoryEntry {
    pub query: String,
    pub insight: String,
}

/// A persisted answer (real or fallback) to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub id: String,
    pub user_id: String,
    pub query: String,
    pub insight: String,
    pub created_at: DateTime<Utc>,

    /// Set once a downstream reader has delivered the insight
    #[serde(default)]
    pub consumed: bool,
}

/// Per-user feature flags consulted by the readiness loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Spoken queries to the assistant after a wake word
    ExplicitAgent,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::ExplicitAgent => "explicit_agent",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
