//! Language-model agent implementations for Earshot.
//!
//! All agents implement the `earshot_core::Agent` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatAgent;
