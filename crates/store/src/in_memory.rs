//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use earshot_core::clock::{Clock, SystemClock, window_start};
use earshot_core::error::StoreError;
use earshot_core::store::Store;
use earshot_core::types::{
    Feature, InsightHistoryEntry, InsightRecord, QueryId, TranscriptFragment, TranscriptWindow,
    UserRecord,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    fragments: Vec<TranscriptFragment>,
    pending: HashMap<String, DateTime<Utc>>,
    features: HashSet<(String, Feature)>,
    queries: Vec<(QueryId, String, String)>,
    insights: Vec<InsightRecord>,
}

/// A store that keeps everything in process memory.
///
/// Window queries are evaluated against the injected [`Clock`], so tests can
/// drive the readiness timers deterministically with a `ManualClock`.
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    clock: Arc<dyn Clock>,
    ready: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock,
            ready: AtomicBool::new(true),
        }
    }

    /// Toggle the availability gate.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Queries persisted for a user, oldest first.
    pub async fn queries(&self, user_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .queries
            .iter()
            .filter(|(_, u, _)| u == user_id)
            .map(|(_, _, q)| q.clone())
            .collect()
    }

    /// Whether the user currently has a pending wake word.
    pub async fn is_pending(&self, user_id: &str) -> bool {
        self.state.read().await.pending.contains_key(user_id)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn users_with_pending_wake_word(&self) -> Result<Vec<UserRecord>, StoreError> {
        let state = self.state.read().await;
        let mut users: Vec<UserRecord> = state
            .pending
            .iter()
            .map(|(user_id, at)| UserRecord {
                user_id: user_id.clone(),
                last_wake_word_time: *at,
            })
            .collect();
        users.sort_by(|a, b| {
            a.last_wake_word_time
                .cmp(&b.last_wake_word_time)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(users)
    }

    async fn recent_transcripts(
        &self,
        window: Duration,
    ) -> Result<Vec<TranscriptFragment>, StoreError> {
        let since = window_start(self.clock.now(), window);
        let state = self.state.read().await;
        Ok(state
            .fragments
            .iter()
            .filter(|f| f.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn is_feature_enabled(
        &self,
        user_id: &str,
        feature: Feature,
    ) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state.features.contains(&(user_id.to_string(), feature)))
    }

    async fn set_feature(
        &self,
        user_id: &str,
        feature: Feature,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let key = (user_id.to_string(), feature);
        if enabled {
            state.features.insert(key);
        } else {
            state.features.remove(&key);
        }
        Ok(())
    }

    async fn record_wake_word(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .pending
            .insert(user_id.to_string(), at);
        Ok(())
    }

    async fn latest_transcript(
        &self,
        user: &UserRecord,
    ) -> Result<Option<TranscriptFragment>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .fragments
            .iter()
            .filter(|f| f.user_id == user.user_id)
            .max_by_key(|f| f.timestamp)
            .cloned())
    }

    async fn reset_pending(&self, user_id: &str) -> Result<(), StoreError> {
        self.state.write().await.pending.remove(user_id);
        Ok(())
    }

    async fn append_transcript(&self, fragment: TranscriptFragment) -> Result<(), StoreError> {
        self.state.write().await.fragments.push(fragment);
        Ok(())
    }

    async fn transcript_window(
        &self,
        user_id: &str,
        lookback: Duration,
    ) -> Result<TranscriptWindow, StoreError> {
        let since = window_start(self.clock.now(), lookback);
        let state = self.state.read().await;
        let mut fragments: Vec<&TranscriptFragment> = state
            .fragments
            .iter()
            .filter(|f| f.user_id == user_id && f.timestamp >= since)
            .collect();
        fragments.sort_by_key(|f| f.timestamp);
        Ok(TranscriptWindow::from_fragments(fragments))
    }

    async fn insight_history(
        &self,
        user_id: &str,
        _device_id: Option<&str>,
        include_consumed: bool,
    ) -> Result<Vec<InsightHistoryEntry>, StoreError> {
        // Insights are not device-scoped
        let state = self.state.read().await;
        Ok(state
            .insights
            .iter()
            .filter(|i| i.user_id == user_id && (include_consumed || !i.consumed))
            .map(|i| InsightHistoryEntry {
                query: i.query.clone(),
                insight: i.insight.clone(),
            })
            .collect())
    }

    async fn persist_query(&self, user_id: &str, query: &str) -> Result<QueryId, StoreError> {
        let id = QueryId::new();
        self.state
            .write()
            .await
            .queries
            .push((id, user_id.to_string(), query.to_string()));
        Ok(id)
    }

    async fn persist_insight(
        &self,
        user_id: &str,
        query: &str,
        insight: &str,
    ) -> Result<(), StoreError> {
        let record = InsightRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            query: query.to_string(),
            insight: insight.to_string(),
            created_at: self.clock.now(),
            consumed: false,
        };
        self.state.write().await.insights.push(record);
        Ok(())
    }

    async fn take_unconsumed_insights(
        &self,
        user_id: &str,
    ) -> Result<Vec<InsightRecord>, StoreError> {
        let mut state = self.state.write().await;
        let mut taken = Vec::new();
        for insight in state
            .insights
            .iter_mut()
            .filter(|i| i.user_id == user_id && !i.consumed)
        {
            insight.consumed = true;
            taken.push(insight.clone());
        }
        Ok(taken)
    }

    async fn insights(&self, user_id: &str) -> Result<Vec<InsightRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .insights
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }
}
