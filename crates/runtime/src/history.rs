//! Prompt context assembly for a dispatch.

use earshot_core::types::InsightHistoryEntry;

/// Upper bound on the transcript context handed to the agent (~500 tokens).
pub const CONTEXT_MAX_CHARS: usize = 2000;

/// Render past exchanges oldest first as `User: <query>\nLLM:<insight>\n\n` blocks.
pub fn render_history(entries: &[InsightHistoryEntry]) -> String {
    let mut history = String::new();
    for entry in entries {
        history.push_str("User: ");
        history.push_str(&entry.query);
        history.push_str("\nLLM:");
        history.push_str(&entry.insight);
        history.push_str("\n\n");
    }
    history
}

/// Situational context for the agent.
///
/// Cuts `raw` just before the first occurrence of `query` so the question
/// never appears in its own context, then keeps the last
/// [`CONTEXT_MAX_CHARS`] characters.
pub fn build_context(raw: &str, query: &str) -> String {
    let before = match raw.find(query) {
        Some(at) => &raw[..at],
        None => raw,
    };

    let len = before.chars().count();
    if len <= CONTEXT_MAX_CHARS {
        return before.to_string();
    }
    before.chars().skip(len - CONTEXT_MAX_CHARS).collect()
}
