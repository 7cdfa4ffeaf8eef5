//! Small helpers shared across modules.

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at microsecond precision, the resolution the remote keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Truncate a string to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}
