//! Query dispatch — answer one ready query, exactly once.
//!
//! Every dispatch ends with exactly one persisted insight, the agent's answer
//! or the configured fallback, and with the user's pending state released.

use earshot_config::DispatchConfig;
use earshot_core::agent::{Agent, AgentRequest};
use earshot_core::clock::Clock;
use earshot_core::error::{AgentError, Error, Result};
use earshot_core::event::{DomainEvent, EventBus};
use earshot_core::store::Store;
use earshot_core::types::UserRecord;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::history::{build_context, render_history};

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The agent's insight was persisted
    Answered,
    /// Something failed and the fallback insight was persisted instead
    Fallback,
}

/// Turns a (user, query) pair into a persisted insight.
pub struct QueryDispatcher {
    store: Arc<dyn Store>,
    agent: Arc<dyn Agent>,
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
}

impl QueryDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        agent: Arc<dyn Agent>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            agent,
            config,
            clock,
            events: None,
        }
    }

    /// Publish `InsightPersisted` / `TickFailed` events on this bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Answer `query` for `user`.
    ///
    /// Never fails: agent errors, agent panics and store errors all end in the
    /// fallback insight. The pending state is reset on every path.
    pub async fn dispatch(
        &self,
        query: &str,
        user: &UserRecord,
        device_id: Option<&str>,
    ) -> DispatchOutcome {
        let user_id = user.user_id.as_str();
        info!(user_id = %user_id, device_id = ?device_id, query = %query, "Dispatching query");
        let started = Instant::now();

        let answered = AssertUnwindSafe(self.answer(query, user_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(AgentError::Panicked(panic_message(&*panic)).into()));

        let (outcome, persisted) = match answered {
            Ok(()) => (DispatchOutcome::Answered, true),
            Err(e) => {
                error!(user_id = %user_id, kind = e.kind(), error = %e, "Insight generation failed, using fallback");
                let persisted = match self
                    .store
                    .persist_insight(user_id, query, &self.config.fallback_insight)
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        error!(user_id = %user_id, error = %e, "Failed to persist fallback insight");
                        self.failed(&Error::Store(e), "persist fallback insight");
                        false
                    }
                };
                (DispatchOutcome::Fallback, persisted)
            }
        };

        if let Err(e) = self.store.reset_pending(user_id).await {
            warn!(user_id = %user_id, error = %e, "Failed to reset pending state after dispatch");
            self.failed(&Error::Store(e), "reset pending after dispatch");
        }

        let elapsed = started.elapsed();
        info!(
            user_id = %user_id,
            outcome = ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "Insight generation completed"
        );

        if let Some(events) = self.events.as_ref().filter(|_| persisted) {
            events.publish(DomainEvent::InsightPersisted {
                user_id: user_id.to_string(),
                query: query.to_string(),
                fallback: outcome == DispatchOutcome::Fallback,
                duration_ms: elapsed.as_millis() as u64,
                timestamp: self.clock.now(),
            });
        }

        outcome
    }

    /// The fallible region: everything up to and including the real insight write.
    async fn answer(&self, query: &str, user_id: &str) -> Result<()> {
        let query_id = self.store.persist_query(user_id, query).await?;
        debug!(user_id = %user_id, query_id = %query_id, "Query recorded");

        let history = self.store.insight_history(user_id, None, true).await?;
        let insight_history = render_history(&history);

        let window = self
            .store
            .transcript_window(user_id, self.config.context_window())
            .await?;
        let transcript_context = build_context(&window.text, query);
        debug!(
            user_id = %user_id,
            history_entries = history.len(),
            context_chars = transcript_context.chars().count(),
            "Context assembled"
        );

        let insight = self
            .agent
            .run(AgentRequest {
                user_id: user_id.to_string(),
                query: query.to_string(),
                transcript_context,
                insight_history,
            })
            .await?;

        self.store.persist_insight(user_id, query, &insight).await?;
        Ok(())
    }

    fn failed(&self, error: &Error, context: &str) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::TickFailed {
                kind: error.kind().to_string(),
                context: format!("{context}: {error}"),
                timestamp: self.clock.now(),
            });
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
