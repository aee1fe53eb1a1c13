//! Shared fakes for runtime tests.

use chrono::{DateTime, TimeZone, Utc};
use earshot_core::agent::{Agent, AgentRequest};
use earshot_core::clock::ManualClock;
use earshot_core::error::{AgentError, StoreError};
use earshot_core::store::Store;
use earshot_core::types::{
    Feature, InsightHistoryEntry, InsightRecord, QueryId, TranscriptFragment, TranscriptWindow,
    UserRecord,
};
use earshot_store::InMemoryStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A fixed, readable starting instant.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// A manual clock and an in-memory store reading from it.
pub fn fixture() -> (Arc<ManualClock>, Arc<InMemoryStore>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    (clock, store)
}

pub fn user(user_id: &str, woke_at: DateTime<Utc>) -> UserRecord {
    UserRecord {
        user_id: user_id.into(),
        last_wake_word_time: woke_at,
    }
}

/// An agent that replays scripted results and records every request.
///
/// Once the script runs out it keeps answering "ok".
pub struct ScriptedAgent {
    script: Mutex<Vec<Result<String, AgentError>>>,
    requests: Mutex<Vec<AgentRequest>>,
    delay: Option<Duration>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<Result<String, AgentError>>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn answering<const N: usize>(answers: [&str; N]) -> Self {
        Self::new(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    /// Sleep (tokio time) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<AgentRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn queries(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.query.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, request: AgentRequest) -> Result<String, AgentError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok("ok".into())
        } else {
            script.remove(0)
        }
    }
}

/// An agent whose every call panics.
pub struct PanickingAgent;

#[async_trait::async_trait]
impl Agent for PanickingAgent {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn run(&self, _request: AgentRequest) -> Result<String, AgentError> {
        panic!("agent exploded");
    }
}

/// An in-memory store whose dispatch-path writes and reads can be made to fail.
pub struct FlakyStore {
    pub inner: Arc<InMemoryStore>,
    pub fail_persist_query: AtomicBool,
    pub fail_insight_history: AtomicBool,
    /// How many upcoming `persist_insight` calls fail before writes go through.
    pub failing_insight_writes: AtomicUsize,
    pub fail_reset: AtomicBool,
    resets: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_persist_query: AtomicBool::new(false),
            fail_insight_history: AtomicBool::new(false),
            failing_insight_writes: AtomicUsize::new(0),
            fail_reset: AtomicBool::new(false),
            resets: AtomicUsize::new(0),
        }
    }

    /// Number of `reset_pending` calls, failed ones included.
    pub fn reset_calls(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn broken(what: &str) -> StoreError {
        StoreError::QueryFailed(format!("{what} refused"))
    }
}

#[async_trait::async_trait]
impl Store for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn is_ready(&self) -> bool {
        self.inner.is_ready().await
    }

    async fn users_with_pending_wake_word(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.inner.users_with_pending_wake_word().await
    }

    async fn recent_transcripts(&self, window: Duration) -> Result<Vec<TranscriptFragment>, StoreError> {
        self.inner.recent_transcripts(window).await
    }

    async fn is_feature_enabled(&self, user_id: &str, feature: Feature) -> Result<bool, StoreError> {
        self.inner.is_feature_enabled(user_id, feature).await
    }

    async fn set_feature(&self, user_id: &str, feature: Feature, enabled: bool) -> Result<(), StoreError> {
        self.inner.set_feature(user_id, feature, enabled).await
    }

    async fn record_wake_word(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.record_wake_word(user_id, at).await
    }

    async fn latest_transcript(&self, user: &UserRecord) -> Result<Option<TranscriptFragment>, StoreError> {
        self.inner.latest_transcript(user).await
    }

    async fn reset_pending(&self, user_id: &str) -> Result<(), StoreError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(Self::broken("reset_pending"));
        }
        self.inner.reset_pending(user_id).await
    }

    async fn append_transcript(&self, fragment: TranscriptFragment) -> Result<(), StoreError> {
        self.inner.append_transcript(fragment).await
    }

    async fn transcript_window(&self, user_id: &str, lookback: Duration) -> Result<TranscriptWindow, StoreError> {
        self.inner.transcript_window(user_id, lookback).await
    }

    async fn insight_history(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        include_consumed: bool,
    ) -> Result<Vec<InsightHistoryEntry>, StoreError> {
        if self.fail_insight_history.load(Ordering::SeqCst) {
            return Err(Self::broken("insight_history"));
        }
        self.inner.insight_history(user_id, device_id, include_consumed).await
    }

    async fn persist_query(&self, user_id: &str, query: &str) -> Result<QueryId, StoreError> {
        if self.fail_persist_query.load(Ordering::SeqCst) {
            return Err(Self::broken("persist_query"));
        }
        self.inner.persist_query(user_id, query).await
    }

    async fn persist_insight(&self, user_id: &str, query: &str, insight: &str) -> Result<(), StoreError> {
        let failing = self
            .failing_insight_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Self::broken("persist_insight"));
        }
        self.inner.persist_insight(user_id, query, insight).await
    }

    async fn take_unconsumed_insights(&self, user_id: &str) -> Result<Vec<InsightRecord>, StoreError> {
        self.inner.take_unconsumed_insights(user_id).await
    }

    async fn insights(&self, user_id: &str) -> Result<Vec<InsightRecord>, StoreError> {
        self.inner.insights(user_id).await
    }
}
