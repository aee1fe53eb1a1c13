//! # Earshot Runtime
//!
//! The two moving parts of the engine:
//! - [`ReadinessPoller`] ticks over the store, feeds fresh transcript text to
//!   the wake-word scanner and decides when a pending user's query is ready
//! - [`QueryDispatcher`] answers one ready query, falling back to a fixed
//!   insight on any failure and always releasing the user's pending state

pub mod dispatcher;
pub mod history;
pub mod poller;
pub mod readiness;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::{DispatchOutcome, QueryDispatcher};
pub use poller::{ReadinessPoller, TickReport};
pub use readiness::{Readiness, lookback_window};
