//! End-to-end tests for the Earshot readiness pipeline.
//!
//! These drive the real scanner, extractor, poller and dispatcher over a
//! store, with a manual clock standing in for wall time and a scripted agent
//! standing in for the language model.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use earshot_config::{DispatchConfig, DispatchMode, PollerConfig};
use earshot_core::agent::{Agent, AgentRequest};
use earshot_core::clock::{Clock, ManualClock};
use earshot_core::error::AgentError;
use earshot_core::event::{DomainEvent, EventBus};
use earshot_core::store::Store;
use earshot_core::types::{Feature, TranscriptFragment};
use earshot_core::wake_word::{PhraseScanner, WakePhraseExtractor, WakeWords};
use earshot_runtime::{QueryDispatcher, ReadinessPoller};
use earshot_store::{InMemoryStore, SqliteStore};

const FALLBACK: &str = "Hmm, not sure about that one, bud.";
const TICK: Duration = Duration::from_millis(100);

// ── Mock Agent ───────────────────────────────────────────────────────────

/// A mock agent that returns scripted results in sequence.
struct ScriptedAgent {
    responses: Mutex<Vec<Result<String, AgentError>>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    fn new(responses: Vec<Result<String, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn text(answer: &str) -> Self {
        Self::new(vec![Ok(answer.to_string())])
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn run(&self, request: AgentRequest) -> Result<String, AgentError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("ok".into())
        } else {
            responses.remove(0)
        }
    }
}

/// An agent that records when each user's call starts and ends.
struct SlowAgent {
    log: Mutex<Vec<(String, &'static str)>>,
    delay: Duration,
}

#[async_trait::async_trait]
impl Agent for SlowAgent {
    fn name(&self) -> &str {
        "slow"
    }

    async fn run(&self, request: AgentRequest) -> Result<String, AgentError> {
        self.log.lock().unwrap().push((request.user_id.clone(), "start"));
        tokio::time::sleep(self.delay).await;
        self.log.lock().unwrap().push((request.user_id.clone(), "end"));
        Ok(format!("answer for {}", request.query))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
}

struct Pipeline {
    clock: Arc<ManualClock>,
    store: Arc<dyn Store>,
    poller: Arc<ReadinessPoller>,
    events: Arc<EventBus>,
}

fn pipeline_with(
    store: Arc<dyn Store>,
    clock: Arc<ManualClock>,
    agent: Arc<dyn Agent>,
    mode: DispatchMode,
) -> Pipeline {
    let events = Arc::new(EventBus::default());
    let words = WakeWords::new(["hey augment", "hey assistant"]);

    let scanner =
        PhraseScanner::new(store.clone(), words.clone(), clock.clone()).with_events(events.clone());
    let dispatcher = QueryDispatcher::new(
        store.clone(),
        agent,
        DispatchConfig::default(),
        clock.clone(),
    )
    .with_events(events.clone());
    let poller = ReadinessPoller::new(
        store.clone(),
        Arc::new(scanner),
        Arc::new(WakePhraseExtractor::new(words)),
        Arc::new(dispatcher),
        clock.clone(),
        PollerConfig {
            dispatch_mode: mode,
            max_concurrent_dispatches: 4,
            ..PollerConfig::default()
        },
    )
    .with_events(events.clone());

    Pipeline {
        clock,
        store,
        poller: Arc::new(poller),
        events,
    }
}

fn pipeline(agent: Arc<dyn Agent>) -> (Pipeline, Arc<InMemoryStore>) {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    (
        pipeline_with(store.clone(), clock, agent, DispatchMode::Inline),
        store,
    )
}

impl Pipeline {
    async fn enable(&self, user_id: &str) {
        self.store
            .set_feature(user_id, Feature::ExplicitAgent, true)
            .await
            .unwrap();
    }

    async fn say(&self, user_id: &str, text: &str) {
        self.store
            .append_transcript(
                TranscriptFragment::new(user_id, text, self.clock.now())
                    .with_device("glasses-1")
                    .with_language("en-US"),
            )
            .await
            .unwrap();
    }

    /// Advance the clock one tick and run the poller once.
    async fn step(&self) {
        self.clock.advance(TICK);
        self.poller.tick().await.unwrap();
    }

    async fn run_for(&self, duration: Duration) {
        for _ in 0..(duration.as_millis() / TICK.as_millis()) {
            self.step().await;
        }
    }

    /// Seconds since the start of the test.
    fn elapsed(&self) -> f64 {
        (self.clock.now() - start()).num_milliseconds() as f64 / 1000.0
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Arc<DomainEvent>>) -> Vec<DomainEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push((*event).clone());
    }
    out
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_quiet_user_is_dispatched_once_when_the_loop_catches_up_at_eight_seconds() {
    let agent = Arc::new(ScriptedAgent::text("It's 9:38."));
    let (p, store) = pipeline(agent.clone());
    let mut rx = p.events.subscribe();

    // Wake word detected at t=0, the query was the only thing said
    store.record_wake_word("u1", p.clock.now()).await.unwrap();
    p.say("u1", "hey augment what time is it").await;

    // First tick at t=8: the pause has long elapsed
    p.clock.advance(Duration::from_secs(8));
    p.poller.tick().await.unwrap();
    assert_eq!(agent.calls(), 1);
    assert_eq!(agent.requests()[0].query, "what time is it");

    p.run_for(Duration::from_secs(10)).await;
    assert_eq!(agent.calls(), 1, "dispatched exactly once");
    assert_eq!(store.insights("u1").await.unwrap().len(), 1);

    let lookbacks: Vec<u64> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            DomainEvent::QueryReady { lookback_secs, .. } => Some(lookback_secs),
            _ => None,
        })
        .collect();
    assert_eq!(lookbacks, vec![16]);
}

#[tokio::test]
async fn e2e_wake_word_without_speech_is_released_by_force_timeout() {
    let agent = Arc::new(ScriptedAgent::text("unused"));
    let (p, store) = pipeline(agent.clone());

    store.record_wake_word("u1", p.clock.now()).await.unwrap();

    p.run_for(Duration::from_secs(8)).await;
    assert!(store.is_pending("u1").await, "not ready at exactly t=8");

    // Nothing to extract from an empty window: released without dispatch
    p.step().await;
    assert!(!store.is_pending("u1").await);

    p.run_for(Duration::from_secs(10)).await;
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn e2e_wake_word_then_pause_answers_the_query() {
    let agent = Arc::new(ScriptedAgent::text("Lima."));
    let (p, store) = pipeline(agent.clone());
    let mut rx = p.events.subscribe();
    p.enable("u1").await;

    p.say("u1", "so we land on tuesday").await;
    p.clock.advance(Duration::from_secs(3));
    p.say("u1", "Hey Augment, what's the capital of Peru?").await;

    p.run_for(Duration::from_secs(4)).await;

    assert_eq!(agent.calls(), 1);
    let request = &agent.requests()[0];
    assert_eq!(request.user_id, "u1");
    assert_eq!(request.query, "what's the capital of Peru?");
    assert_eq!(request.transcript_context, "so we land on tuesday Hey Augment, ");
    assert_eq!(request.insight_history, "");

    let insights = store.insights("u1").await.unwrap();
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].insight, "Lima.");
    assert_eq!(store.queries("u1").await, vec!["what's the capital of Peru?"]);
    assert!(!store.is_pending("u1").await);

    let events = drain(&mut rx);
    assert!(matches!(events[0], DomainEvent::WakeWordDetected { .. }));
    assert!(events.iter().any(|e| matches!(
        e,
        DomainEvent::QueryReady { forced: false, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        DomainEvent::InsightPersisted { fallback: false, .. }
    )));
}

#[tokio::test]
async fn e2e_continuous_speech_is_cut_off_by_force_timeout() {
    let agent = Arc::new(ScriptedAgent::text("Sure."));
    let (p, _store) = pipeline(agent.clone());
    p.enable("u1").await;

    p.say("u1", "hey assistant tell me").await;
    p.step().await; // scanner marks u1 pending at t=0.1

    let mut dispatched_at = None;
    // Speak every 500 ms until t=10 s
    while p.elapsed() < 10.0 {
        if (p.elapsed() * 10.0).round() as i64 % 5 == 0 {
            p.say("u1", "and more").await;
        }
        p.step().await;
        if dispatched_at.is_none() && agent.calls() == 1 {
            dispatched_at = Some(p.elapsed());
        }
    }

    let at = dispatched_at.expect("force timeout dispatched");
    assert!((8.0..8.5).contains(&at), "dispatched at {at}");
    assert_eq!(agent.calls(), 1);
    assert!(agent.requests()[0].query.starts_with("tell me and more"));
}

#[tokio::test]
async fn e2e_history_accumulates_across_queries() {
    let agent = Arc::new(ScriptedAgent::new(vec![
        Ok("8849 metres.".into()),
        Ok("8611 metres.".into()),
    ]));
    let (p, store) = pipeline(agent.clone());
    p.enable("u1").await;

    p.say("u1", "hey augment how tall is everest").await;
    p.run_for(Duration::from_secs(3)).await;
    p.say("u1", "hey augment and k2").await;
    p.run_for(Duration::from_secs(3)).await;

    let requests = agent.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].insight_history,
        "User: how tall is everest\nLLM:8849 metres.\n\n"
    );
    assert!(!requests[1].transcript_context.contains("and k2"));

    // Reading insights consumes them, but they stay in the history
    assert_eq!(store.take_unconsumed_insights("u1").await.unwrap().len(), 2);
    assert!(store.take_unconsumed_insights("u1").await.unwrap().is_empty());
    assert_eq!(store.insight_history("u1", None, true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn e2e_extraction_miss_drops_the_query() {
    let agent = Arc::new(ScriptedAgent::text("unused"));
    let (p, store) = pipeline(agent.clone());
    p.enable("u1").await;

    p.say("u1", "hey augment").await;
    p.run_for(Duration::from_secs(3)).await;

    assert_eq!(agent.calls(), 0);
    assert!(store.queries("u1").await.is_empty());
    assert!(store.insights("u1").await.unwrap().is_empty());
    assert!(!store.is_pending("u1").await, "a fresh wake word is needed");
}

#[tokio::test]
async fn e2e_agent_failure_persists_fallback() {
    let agent = Arc::new(ScriptedAgent::new(vec![Err(AgentError::ApiError {
        status_code: 500,
        message: "upstream".into(),
    })]));
    let (p, store) = pipeline(agent.clone());
    let mut rx = p.events.subscribe();
    p.enable("u1").await;

    p.say("u1", "hey augment what's the weather").await;
    p.run_for(Duration::from_secs(3)).await;

    let insights = store.insights("u1").await.unwrap();
    assert_eq!(insights.len(), 1, "exactly one insight, never both");
    assert_eq!(insights[0].insight, FALLBACK);
    assert_eq!(insights[0].query, "what's the weather");
    assert!(!store.is_pending("u1").await);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        DomainEvent::InsightPersisted { fallback: true, .. }
    )));
}

#[tokio::test]
async fn e2e_users_are_independent() {
    let agent = Arc::new(ScriptedAgent::new(Vec::new()));
    let (p, store) = pipeline(agent.clone());
    p.enable("alice").await;
    p.enable("bob").await;

    p.say("alice", "hey augment first").await;
    p.run_for(Duration::from_secs(1)).await;
    p.say("bob", "hey assistant second").await;
    p.run_for(Duration::from_secs(3)).await;

    let mut queries: Vec<_> = agent
        .requests()
        .into_iter()
        .map(|r| (r.user_id, r.query))
        .collect();
    queries.sort();
    assert_eq!(
        queries,
        vec![
            ("alice".to_string(), "first".to_string()),
            ("bob".to_string(), "second".to_string())
        ]
    );
    assert!(store.insights("alice").await.unwrap().len() == 1);
    assert!(store.insights("bob").await.unwrap().len() == 1);
}

#[tokio::test]
async fn e2e_concurrent_mode_overlaps_users_not_dispatches() {
    tokio::time::pause();
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let agent = Arc::new(SlowAgent {
        log: Mutex::new(Vec::new()),
        delay: Duration::from_secs(5),
    });
    let p = pipeline_with(store.clone(), clock, agent.clone(), DispatchMode::Concurrent);
    p.enable("alice").await;
    p.enable("bob").await;

    p.say("alice", "hey augment one").await;
    p.say("bob", "hey augment two").await;
    p.run_for(Duration::from_secs(2)).await;
    assert_eq!(p.poller.in_flight(), 2);

    p.poller.drain().await;
    assert_eq!(p.poller.in_flight(), 0);

    let log = agent.log.lock().unwrap().clone();
    // Both started before either finished
    assert_eq!(log[0].1, "start");
    assert_eq!(log[1].1, "start");
    for user in ["alice", "bob"] {
        let events: Vec<_> = log.iter().filter(|(u, _)| u == user).map(|(_, e)| *e).collect();
        assert_eq!(events, vec!["start", "end"]);
        assert_eq!(store.insights(user).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn e2e_store_outage_pauses_processing() {
    let agent = Arc::new(ScriptedAgent::text("Noon."));
    let (p, store) = pipeline(agent.clone());
    p.enable("u1").await;
    p.say("u1", "hey augment what time is it").await;
    p.step().await;
    assert!(store.is_pending("u1").await);

    store.set_ready(false);
    p.run_for(Duration::from_secs(5)).await;
    assert_eq!(agent.calls(), 0);
    assert!(store.is_pending("u1").await);

    store.set_ready(true);
    p.step().await;
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn e2e_sqlite_pipeline_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("earshot.sqlite").display());
    let clock = Arc::new(ManualClock::new(start()));

    {
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::with_clock(&url, clock.clone()).await.unwrap());
        let agent = Arc::new(ScriptedAgent::text("Lima."));
        let p = pipeline_with(store, clock.clone(), agent.clone(), DispatchMode::Inline);
        p.enable("u1").await;
        p.say("u1", "hey augment capital of peru").await;
        p.run_for(Duration::from_secs(3)).await;
        assert_eq!(agent.calls(), 1);
    }

    let reopened = SqliteStore::with_clock(&url, clock).await.unwrap();
    let insights = reopened.take_unconsumed_insights("u1").await.unwrap();
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].query, "capital of peru");
    assert_eq!(insights[0].insight, "Lima.");
    assert!(reopened.users_with_pending_wake_word().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn e2e_run_loop_answers_and_stops_on_shutdown() {
    let agent = Arc::new(ScriptedAgent::text("Lima."));
    let (p, store) = pipeline(agent.clone());
    p.enable("u1").await;
    p.say("u1", "hey augment capital of peru").await;

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn({
        let poller = p.poller.clone();
        async move { poller.run(rx).await }
    });

    // The manual clock does not follow tokio time; move it past the pause
    // timer while the loop keeps ticking
    for _ in 0..30 {
        tokio::time::sleep(TICK).await;
        p.clock.advance(TICK);
    }

    tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(agent.calls(), 1);
    assert_eq!(store.insights("u1").await.unwrap()[0].insight, "Lima.");
}
