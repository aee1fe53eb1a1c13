//! `earshot run` — The readiness poller, until Ctrl-C.

use chrono::Utc;
use earshot_core::clock::{Clock, SystemClock};
use earshot_core::event::{DomainEvent, EventBus};
use earshot_core::store::Store;
use earshot_core::types::{Feature, TranscriptFragment};
use earshot_core::wake_word::{PhraseScanner, WakePhraseExtractor, WakeWords};
use earshot_providers::OpenAiCompatAgent;
use earshot_runtime::{QueryDispatcher, ReadinessPoller};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use super::{load_config, open_store};

pub async fn run(memory: bool, stdin_user: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let agent = OpenAiCompatAgent::from_config(&config.agent)
        .map_err(|e| format!("Agent not available: {e}"))?;
    let store = open_store(&config, memory).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = Arc::new(EventBus::default());
    let wake_words = WakeWords::new(&config.wake_words.phrases);

    println!("👂 Earshot — listening for queries");
    println!("   Store:      {}", store.name());
    println!("   Agent:      {} ({})", config.agent.provider, config.agent.model);
    println!("   Wake words: {}", config.wake_words.phrases.join(", "));
    println!("   Dispatch:   {:?}", config.poller.dispatch_mode);

    let scanner = PhraseScanner::new(store.clone(), wake_words.clone(), clock.clone())
        .with_events(events.clone());
    let dispatcher = QueryDispatcher::new(
        store.clone(),
        Arc::new(agent),
        config.dispatch.clone(),
        clock.clone(),
    )
    .with_events(events.clone());
    let poller = Arc::new(
        ReadinessPoller::new(
            store.clone(),
            Arc::new(scanner),
            Arc::new(WakePhraseExtractor::new(wake_words)),
            Arc::new(dispatcher),
            clock,
            config.poller.clone(),
        )
        .with_events(events.clone()),
    );

    tokio::spawn(report_events(events.subscribe()));

    if let Some(user) = stdin_user {
        store.set_feature(&user, Feature::ExplicitAgent, true).await?;
        println!("   Reading transcript for {user} from stdin");
        tokio::spawn(ingest_stdin(store.clone(), user));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn({
        let poller = poller.clone();
        async move { poller.run(shutdown_rx).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for in-flight dispatches");
    let _ = shutdown_tx.send(true);
    handle.await?;

    Ok(())
}

/// Print what the loop does, as it happens.
async fn report_events(mut rx: broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event reporter lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Some(line) = describe(&event) {
            println!("{line}");
        }
    }
}

fn describe(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::WakeWordDetected { user_id, .. } => Some(format!("🔔 {user_id}: wake word")),
        DomainEvent::ExtractionMissed { user_id, .. } => {
            Some(format!("🤷 {user_id}: no query after the wake word"))
        }
        DomainEvent::InsightPersisted {
            user_id,
            query,
            fallback,
            duration_ms,
            ..
        } => Some(format!(
            "{} {user_id}: \"{query}\" ({duration_ms} ms)",
            if *fallback { "⚠️ " } else { "💡" }
        )),
        DomainEvent::TickFailed { kind, context, .. } => Some(format!("❌ {kind}: {context}")),
        DomainEvent::QueryReady { .. } => None,
    }
}

/// Every stdin line becomes a transcript fragment for `user`.
async fn ingest_stdin(store: Arc<dyn Store>, user: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let fragment = TranscriptFragment::new(user.as_str(), line, Utc::now());
                if let Err(e) = store.append_transcript(fragment).await {
                    warn!(user_id = %user, error = %e, "Failed to append transcript line");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
    info!(user_id = %user, "Stdin closed, no more transcript input");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_user_facing_events() {
        let now = Utc::now();
        let answered = DomainEvent::InsightPersisted {
            user_id: "u1".into(),
            query: "capital of peru".into(),
            fallback: false,
            duration_ms: 420,
            timestamp: now,
        };
        assert_eq!(
            describe(&answered).unwrap(),
            "💡 u1: \"capital of peru\" (420 ms)"
        );

        let ready = DomainEvent::QueryReady {
            user_id: "u1".into(),
            forced: false,
            lookback_secs: 10,
            timestamp: now,
        };
        assert!(describe(&ready).is_none());
    }
}
