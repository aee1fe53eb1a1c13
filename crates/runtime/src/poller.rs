//! The readiness poller — a supervised loop over pending users.
//!
//! Each tick:
//! 1. discovery: new fragments from users with the explicit-agent feature who
//!    are not already pending go through the wake-word scanner
//! 2. readiness: every pending user is checked against the force and pause
//!    timers
//! 3. a ready user is reset, its lookback window is fetched and the query is
//!    extracted
//! 4. the query goes to the dispatcher, awaited inline or spawned onto a
//!    bounded task set depending on [`DispatchMode`]
//!
//! A failing or panicking tick is logged, published as `TickFailed`, and the
//! loop carries on after a short backoff.

use chrono::{DateTime, Utc};
use earshot_config::{DispatchMode, PollerConfig};
use earshot_core::clock::Clock;
use earshot_core::error::{Error, Result};
use earshot_core::event::{DomainEvent, EventBus};
use earshot_core::store::Store;
use earshot_core::types::{Feature, UserRecord};
use earshot_core::wake_word::{QueryExtractor, WakeWordScanner};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{QueryDispatcher, panic_message};
use crate::readiness::{Readiness, lookback_window};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// False when the store was unavailable and the tick did nothing
    pub store_ready: bool,
    /// Fragments handed to the wake-word scanner
    pub scanned: usize,
    /// Users who crossed a readiness timer
    pub ready: usize,
    /// Ready users whose window held no query
    pub missed: usize,
    /// Queries handed to the dispatcher
    pub dispatched: usize,
}

pub struct ReadinessPoller {
    store: Arc<dyn Store>,
    scanner: Arc<dyn WakeWordScanner>,
    extractor: Arc<dyn QueryExtractor>,
    dispatcher: Arc<QueryDispatcher>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    events: Option<Arc<EventBus>>,

    /// When each user was last released by the readiness step. Fragments at
    /// or before this instant were already part of an answered query.
    released_at: Mutex<HashMap<String, DateTime<Utc>>>,

    /// Users with a spawned dispatch still running (concurrent mode)
    in_flight: Arc<Mutex<HashSet<String>>>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl ReadinessPoller {
    pub fn new(
        store: Arc<dyn Store>,
        scanner: Arc<dyn WakeWordScanner>,
        extractor: Arc<dyn QueryExtractor>,
        dispatcher: Arc<QueryDispatcher>,
        clock: Arc<dyn Clock>,
        config: PollerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatches.max(1)));
        Self {
            store,
            scanner,
            extractor,
            dispatcher,
            clock,
            config,
            events: None,
            released_at: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    ///
    /// In-flight dispatches are awaited before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            mode = ?self.config.dispatch_mode,
            tick_ms = self.config.tick_interval_ms,
            "Readiness poller started"
        );

        while !*shutdown.borrow() {
            let outcome = AssertUnwindSafe(self.tick())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(Error::Internal(format!("tick panicked: {}", panic_message(&*panic))))
                });

            let delay = match outcome {
                Ok(report) if !report.store_ready => {
                    debug!("Store not ready, backing off");
                    self.config.not_ready_backoff()
                }
                Ok(_) => self.config.tick_interval(),
                Err(e) => {
                    error!(kind = e.kind(), error = %e, "Readiness tick failed");
                    self.publish(DomainEvent::TickFailed {
                        kind: e.kind().to_string(),
                        context: e.to_string(),
                        timestamp: self.clock.now(),
                    });
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!("Readiness poller stopped");
    }

    /// One pass of discovery and readiness evaluation.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        if !self.store.is_ready().await {
            return Ok(report);
        }
        report.store_ready = true;
        self.reap_finished();

        let users = self.store.users_with_pending_wake_word().await?;
        report.scanned = self.discover(&users).await?;

        for user in &users {
            if self.is_in_flight(&user.user_id) {
                debug!(user_id = %user.user_id, "Dispatch still in flight, leaving pending");
                continue;
            }

            let now = self.clock.now();
            let latest = self.store.latest_transcript(user).await?;
            let Some(readiness) = Readiness::evaluate(
                now,
                user,
                latest.as_ref(),
                self.config.force_query_time(),
                self.config.pause_query_time(),
            ) else {
                continue;
            };
            report.ready += 1;

            // Released before extraction so the next tick cannot pick the user up again
            self.store.reset_pending(&user.user_id).await?;
            lock(&self.released_at).insert(user.user_id.clone(), now);

            let lookback = lookback_window(now, user.last_wake_word_time, self.config.force_query_time());
            info!(
                user_id = %user.user_id,
                forced = readiness.forced,
                lookback_secs = lookback.as_secs(),
                "Query ready"
            );
            self.publish(DomainEvent::QueryReady {
                user_id: user.user_id.clone(),
                forced: readiness.forced,
                lookback_secs: lookback.as_secs(),
                timestamp: now,
            });

            let window = self.store.transcript_window(&user.user_id, lookback).await?;
            let Some(query) = self.extractor.extract(&window.text) else {
                info!(user_id = %user.user_id, text = %window.text, "No query found in transcript window");
                report.missed += 1;
                self.publish(DomainEvent::ExtractionMissed {
                    user_id: user.user_id.clone(),
                    timestamp: now,
                });
                continue;
            };

            report.dispatched += 1;
            match self.config.dispatch_mode {
                DispatchMode::Inline => {
                    self.dispatcher
                        .dispatch(&query, user, window.device_id.as_deref())
                        .await;
                }
                DispatchMode::Concurrent => self.spawn_dispatch(query, user.clone(), window.device_id),
            }
        }

        Ok(report)
    }

    /// Await every spawned dispatch.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Dispatch task ended abnormally");
            }
        }
    }

    /// Number of spawned dispatches not yet finished.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Feed fresh fragments to the scanner; returns how many were scanned.
    async fn discover(&self, users: &[UserRecord]) -> Result<usize> {
        let mut pending: HashSet<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        let fragments = self
            .store
            .recent_transcripts(self.config.discovery_window())
            .await?;

        let mut scanned = 0;
        for fragment in &fragments {
            if !self
                .store
                .is_feature_enabled(&fragment.user_id, Feature::ExplicitAgent)
                .await?
            {
                continue;
            }
            // An in-flight dispatch ends with a reset, which would swallow a
            // wake word detected meanwhile
            if pending.contains(fragment.user_id.as_str()) || self.is_in_flight(&fragment.user_id) {
                continue;
            }
            // Keyed on speech time: a fragment delivered after the release
            // but stamped before it is never scanned
            let already_answered = lock(&self.released_at)
                .get(&fragment.user_id)
                .is_some_and(|released| fragment.timestamp <= *released);
            if already_answered {
                continue;
            }

            scanned += 1;
            if self.scanner.scan(&fragment.user_id, &fragment.text).await? {
                pending.insert(fragment.user_id.as_str());
            }
        }
        Ok(scanned)
    }

    fn spawn_dispatch(&self, query: String, user: UserRecord, device_id: Option<String>) {
        let guard = InFlight::enter(Arc::clone(&self.in_flight), user.user_id.clone());
        let dispatcher = Arc::clone(&self.dispatcher);
        let permits = Arc::clone(&self.permits);

        lock(&self.tasks).spawn(async move {
            let _guard = guard;
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            dispatcher.dispatch(&query, &user, device_id.as_deref()).await;
        });
    }

    fn is_in_flight(&self, user_id: &str) -> bool {
        lock(&self.in_flight).contains(user_id)
    }

    fn reap_finished(&self) {
        let mut tasks = lock(&self.tasks);
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "Dispatch task ended abnormally");
            }
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// Marks a user as having a dispatch in flight until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl InFlight {
    fn enter(set: Arc<Mutex<HashSet<String>>>, user_id: String) -> Self {
        lock(&set).insert(user_id.clone());
        Self { set, user_id }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.user_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
