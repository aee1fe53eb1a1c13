//! When is a pending query ready?
//!
//! Two independent timers, either one is enough:
//! - force: the wake word is older than `force_query_time`
//! - pause: the user's newest fragment is older than `pause_query_time`

use chrono::{DateTime, Utc};
use earshot_core::clock::window_start;
use earshot_core::types::{TranscriptFragment, UserRecord};
use std::time::Duration;

/// Which timer(s) fired for a ready user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub forced: bool,
    pub paused: bool,
}

impl Readiness {
    /// `None` while neither timer has elapsed.
    ///
    /// Both comparisons are strict: at exactly `wake + force` the user is
    /// still pending.
    pub fn evaluate(
        now: DateTime<Utc>,
        user: &UserRecord,
        latest: Option<&TranscriptFragment>,
        force_query_time: Duration,
        pause_query_time: Duration,
    ) -> Option<Self> {
        let forced = window_start(now, force_query_time) > user.last_wake_word_time;
        let paused =
            latest.is_some_and(|fragment| window_start(now, pause_query_time) > fragment.timestamp);

        (forced || paused).then_some(Self { forced, paused })
    }
}

/// How much transcript to hand the extractor.
///
/// The wake-word time is stamped at detection, after the phrase was spoken,
/// so the window is widened by the full force timeout:
/// `round(now - wake) + force_query_time`, rounding half to even.
pub fn lookback_window(
    now: DateTime<Utc>,
    last_wake_word_time: DateTime<Utc>,
    force_query_time: Duration,
) -> Duration {
    let elapsed = (now - last_wake_word_time).num_milliseconds() as f64 / 1000.0;
    let rounded = elapsed.round_ties_even().max(0.0);
    Duration::from_secs(rounded as u64).saturating_add(force_query_time)
}
