//! Prompt context assembled from core memory, the session and long-term memory.

use crate::memory::LongTermEntry;
use crate::sessions::{Session, Turn};

/// Long-term entries included in a memory block.
pub const LONGTERM_MATCH_LIMIT: usize = 4;

const EMPTY: &str = "(empty)";
const NO_LONGTERM_MATCH: &str = "(no relevant long-term memory found)";

/// `[ROLE] content` lines in log order.
pub fn render_turns(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return EMPTY.to_string();
    }
    turns
        .iter()
        .map(|t| format!("[{}] {}", t.role.as_str().to_uppercase(), t.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Texts of the best `limit` entries by how many input tokens they contain.
///
/// Tokens are whitespace-separated, lowercased and longer than one char.
/// Entries that match nothing are dropped; ties keep store order.
pub fn search_longterm<I>(entries: I, user_input: &str, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = LongTermEntry>,
{
    let lowered = user_input.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split_whitespace()
        .filter(|t| t.chars().count() > 1)
        .collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, String)> = entries
        .into_iter()
        .filter_map(|entry| {
            let haystack = entry.text.to_lowercase();
            let score = tokens.iter().filter(|t| haystack.contains(*t)).count();
            (score > 0).then_some((score, entry.text))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, text)| text).collect()
}

/// The four-section memory block prepended to every prompt.
pub fn build_memory_block<I>(
    core: Option<&str>,
    session: &Session,
    longterm: I,
    user_input: &str,
) -> String
where
    I: IntoIterator<Item = LongTermEntry>,
{
    let core = core.map(str::trim).filter(|c| !c.is_empty()).unwrap_or(EMPTY);
    let summary = Some(session.summary.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(EMPTY);
    let matches = search_longterm(longterm, user_input, LONGTERM_MATCH_LIMIT);
    let longterm = if matches.is_empty() {
        NO_LONGTERM_MATCH.to_string()
    } else {
        matches
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    [
        format!("### CORE MEMORY\n{core}"),
        format!("### SESSION SUMMARY\n{summary}"),
        format!(
            "### RECENT CONVERSATION\n{}",
            render_turns(session.unsummarized_turns())
        ),
        format!("### LONG-TERM MEMORY\n{longterm}"),
    ]
    .join("\n\n")
}

/// Memory block followed by the request itself.
pub fn build_prompt<I>(core: Option<&str>, session: &Session, longterm: I, user_input: &str) -> String
where
    I: IntoIterator<Item = LongTermEntry>,
{
    format!(
        "{}\n\n### USER REQUEST\n{user_input}",
        build_memory_block(core, session, longterm, user_input)
    )
}
