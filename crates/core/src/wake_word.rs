//! Wake phrases over transcript text.
//!
//! Matching works on words, not bytes: both the phrase and the transcript are
//! split on whitespace, lower-cased, and stripped of surrounding punctuation,
//! so "Hey, Augment!" matches the phrase "hey augment".
//!
//! Two consumers share the phrase list:
//! - [`PhraseScanner`] marks a user pending when new text contains a phrase
//! - [`WakePhraseExtractor`] returns whatever was said after the last phrase

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::event::{DomainEvent, EventBus};
use crate::store::Store;

/// A normalized set of wake phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeWords {
    phrases: Vec<Vec<String>>,
}

impl WakeWords {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| tokenize(p.as_ref()).into_iter().map(|(_, w)| w).collect::<Vec<_>>())
            .filter(|words: &Vec<String>| !words.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Whether any phrase occurs in `text`.
    pub fn contains(&self, text: &str) -> bool {
        self.last_match(text).is_some()
    }

    /// Byte offset in `text` right after the last phrase occurrence.
    fn last_match(&self, text: &str) -> Option<usize> {
        let words = tokenize(text);
        let mut best: Option<(usize, usize)> = None; // (start word index, end byte)

        for phrase in &self.phrases {
            if phrase.len() > words.len() {
                continue;
            }
            for start in (0..=words.len() - phrase.len()).rev() {
                let hit = phrase
                    .iter()
                    .zip(&words[start..start + phrase.len()])
                    .all(|(p, (_, w))| p == w);
                if hit {
                    let (span, _) = &words[start + phrase.len() - 1];
                    if best.is_none_or(|(s, _)| start > s) {
                        best = Some((start, span.end));
                    }
                    break;
                }
            }
        }

        best.map(|(_, end)| end)
    }
}

/// Split into (byte span of the raw word, normalized word).
fn tokenize(text: &str) -> Vec<(std::ops::Range<usize>, String)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                push_word(text, s..i, &mut out);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        push_word(text, s..text.len(), &mut out);
    }
    out
}

fn push_word(text: &str, span: std::ops::Range<usize>, out: &mut Vec<(std::ops::Range<usize>, String)>) {
    let normalized: String = text[span.clone()]
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if !normalized.is_empty() {
        out.push((span, normalized));
    }
}

/// Detects wake words in freshly arrived transcript text.
#[async_trait]
pub trait WakeWordScanner: Send + Sync {
    /// Scan `text` spoken by `user_id`; returns true if the user became pending.
    async fn scan(&self, user_id: &str, text: &str) -> Result<bool, StoreError>;
}

/// Pulls the spoken query out of a transcript window.
pub trait QueryExtractor: Send + Sync {
    /// `None` when the window holds no clear query.
    fn extract(&self, text: &str) -> Option<String>;
}

/// Scanner backed by a fixed phrase list; records detections in the store.
pub struct PhraseScanner {
    store: Arc<dyn Store>,
    wake_words: WakeWords,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
}

impl PhraseScanner {
    pub fn new(store: Arc<dyn Store>, wake_words: WakeWords, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            wake_words,
            clock,
            events: None,
        }
    }

    /// Publish `WakeWordDetected` events on this bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }
}

#[async_trait]
impl WakeWordScanner for PhraseScanner {
    async fn scan(&self, user_id: &str, text: &str) -> Result<bool, StoreError> {
        if !self.wake_words.contains(text) {
            return Ok(false);
        }

        // Stamped at detection, not when the phrase was spoken
        let now = self.clock.now();
        self.store.record_wake_word(user_id, now).await?;
        info!(user_id = %user_id, "Wake word detected");

        if let Some(events) = &self.events {
            events.publish(DomainEvent::WakeWordDetected {
                user_id: user_id.to_string(),
                timestamp: now,
            });
        }
        Ok(true)
    }
}

/// Returns the text following the last wake phrase in the window.
#[derive(Debug, Clone)]
pub struct WakePhraseExtractor {
    wake_words: WakeWords,
}

impl WakePhraseExtractor {
    pub fn new(wake_words: WakeWords) -> Self {
        Self { wake_words }
    }
}

impl QueryExtractor for WakePhraseExtractor {
    fn extract(&self, text: &str) -> Option<String> {
        let end = self.wake_words.last_match(text)?;
        let query = text[end..]
            .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .trim_end();

        if query.is_empty() {
            debug!("Wake phrase found but nothing was asked after it");
            return None;
        }
        Some(query.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words() -> WakeWords {
        WakeWords::new(["hey augment", "hey assistant"])
    }

    #[test]
    fn contains_ignores_case_and_punctuation() {
        let ww = words();
        assert!(ww.contains("Hey, Augment! what's the weather"));
        assert!(ww.contains("so um hey assistant"));
        assert!(!ww.contains("hey there augment"));
        assert!(!ww.contains(""));
    }

    #[test]
    fn empty_phrases_are_dropped() {
        let ww = WakeWords::new(["", "   ", "!!"]);
        assert!(ww.is_empty());
        assert!(!ww.contains("anything at all"));
    }

    #[test]
    fn extracts_text_after_wake_phrase() {
        let extractor = WakePhraseExtractor::new(words());
        let query = extractor.extract("we were talking and then hey augment, what is the capital of Peru?");
        assert_eq!(query.as_deref(), Some("what is the capital of Peru?"));
    }

    #[test]
    fn extracts_after_the_last_occurrence() {
        let extractor = WakePhraseExtractor::new(words());
        let query = extractor.extract("hey augment never mind. Hey assistant how tall is Everest");
        assert_eq!(query.as_deref(), Some("how tall is Everest"));
    }

    #[test]
    fn nothing_after_phrase_is_a_miss() {
        let extractor = WakePhraseExtractor::new(words());
        assert_eq!(extractor.extract("okay hey augment."), None);
        assert_eq!(extractor.extract("no trigger here at all"), None);
    }

    #[test]
    fn handles_multibyte_text() {
        let extractor = WakePhraseExtractor::new(words());
        let query = extractor.extract("héllo wörld HEY AUGMENT qué hora es");
        assert_eq!(query.as_deref(), Some("qué hora es"));
    }
}
