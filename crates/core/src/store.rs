//! Store trait — the persistence boundary of the readiness loop.
//!
//! The store owns every durable entity: transcript fragments, per-user
//! wake-word state, feature flags, queries and insights. The runtime holds
//! no state of its own between ticks.
//!
//! Implementations must make each per-user write atomic. The runtime does
//! not lock around store calls and tolerates redundant resets
//! (last write wins).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::StoreError;
use crate::types::{
    Feature, InsightHistoryEntry, InsightRecord, QueryId, TranscriptFragment, TranscriptWindow,
    UserRecord,
};

/// The core Store trait.
///
/// Implementations: SQLite, in-memory (for testing and ephemeral runs).
#[async_trait]
pub trait Store: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Whether the store can serve requests right now.
    async fn is_ready(&self) -> bool;

    /// Users whose wake word has been detected and not yet reset.
    async fn users_with_pending_wake_word(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Fragments from all users that arrived within `window` of now.
    async fn recent_transcripts(
        &self,
        window: Duration,
    ) -> Result<Vec<TranscriptFragment>, StoreError>;

    /// Whether `feature` is switched on for `user_id`.
    async fn is_feature_enabled(&self, user_id: &str, feature: Feature)
    -> Result<bool, StoreError>;

    /// Enable or disable a feature for a user.
    async fn set_feature(
        &self,
        user_id: &str,
        feature: Feature,
        enabled: bool,
    ) -> Result<(), StoreError>;

    /// Mark the user pending, stamping the detection time.
    async fn record_wake_word(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// The newest fragment for a user, if any.
    async fn latest_transcript(
        &self,
        user: &UserRecord,
    ) -> Result<Option<TranscriptFragment>, StoreError>;

    /// Clear the user's pending state. Idempotent.
    async fn reset_pending(&self, user_id: &str) -> Result<(), StoreError>;

    /// Append a transcribed fragment.
    async fn append_transcript(&self, fragment: TranscriptFragment) -> Result<(), StoreError>;

    /// Concatenated text of the user's last `lookback`, oldest first.
    async fn transcript_window(
        &self,
        user_id: &str,
        lookback: Duration,
    ) -> Result<TranscriptWindow, StoreError>;

    /// Past (query, insight) pairs, oldest first.
    ///
    /// `device_id = None` means every device.
    async fn insight_history(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        include_consumed: bool,
    ) -> Result<Vec<InsightHistoryEntry>, StoreError>;

    /// Persist an extracted query.
    async fn persist_query(&self, user_id: &str, query: &str) -> Result<QueryId, StoreError>;

    /// Persist the answer to a query.
    async fn persist_insight(
        &self,
        user_id: &str,
        query: &str,
        insight: &str,
    ) -> Result<(), StoreError>;

    /// Return the user's unconsumed insights (oldest first) and mark them consumed.
    async fn take_unconsumed_insights(
        &self,
        user_id: &str,
    ) -> Result<Vec<InsightRecord>, StoreError>;

    /// Every insight for a user, oldest first, without consuming anything.
    async fn insights(&self, user_id: &str) -> Result<Vec<InsightRecord>, StoreError>;
}
