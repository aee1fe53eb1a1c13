//! # Earshot Core
//!
//! Domain types, traits, and error definitions for the Earshot query
//! readiness engine. This crate has **no I/O of its own** — it defines the
//! model that the store, provider, and runtime crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the readiness loop is a trait here:
//! - [`Store`] — transcripts, wake-word state, feature flags, insights
//! - [`WakeWordScanner`] — turns new transcript text into a pending user
//! - [`QueryExtractor`] — pulls the spoken query out of a transcript window
//! - [`Agent`] — answers an extracted query
//! - [`Clock`] — the notion of "now", swappable in tests
//!
//! Implementations live in their respective crates, so the loop can be
//! exercised end to end against in-memory fakes.

pub mod agent;
pub mod clock;
pub mod error;
pub mod event;
pub mod store;
pub mod types;
pub mod wake_word;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentRequest};
pub use clock::{Clock, ManualClock, SystemClock, window_start};
pub use error::{AgentError, Error, Result, StoreError};
pub use event::{DomainEvent, EventBus};
pub use store::Store;
pub use types::{
    Feature, InsightHistoryEntry, InsightRecord, QueryId, TranscriptFragment, TranscriptWindow,
    UserRecord,
};
pub use wake_word::{PhraseScanner, QueryExtractor, WakePhraseExtractor, WakeWordScanner, WakeWords};
