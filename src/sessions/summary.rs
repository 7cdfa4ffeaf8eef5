//! Rolling auto-summary.
//!
//! When the unsummarized tail grows past `max_turns`, everything except the
//! newest `keep_recent` turns is folded into the summary text. Turns are
//! never removed from the transcript; only `summarized_through` advances.

use chrono::{DateTime, SecondsFormat, Utc};

use super::traits::{Session, SessionId, SessionStore, Turn};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::util::truncate_with_ellipsis;

/// Maximum characters of one turn copied into the summary.
const TURN_SNIPPET_CHARS: usize = 220;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPolicy {
    pub max_turns: usize,
    pub keep_recent: usize,
}

impl From<&StoreConfig> for SummaryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_turns: config.max_conversation_turns,
            keep_recent: config.keep_recent_turns,
        }
    }
}

fn compress_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| {
            format!(
                "- {}: {}",
                t.role,
                truncate_with_ellipsis(t.content.trim(), TURN_SNIPPET_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// New `(summary, summarized_through)` if the session needs folding.
pub fn plan_auto_summary(
    session: &Session,
    policy: SummaryPolicy,
    at: DateTime<Utc>,
) -> Option<(String, usize)> {
    let pending = session.unsummarized_turns();
    if pending.len() <= policy.max_turns {
        return None;
    }
    let fold = pending.len() - policy.keep_recent.min(pending.len());
    if fold == 0 {
        return None;
    }

    let block = format!(
        "[Auto summary @ {}]\n{}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        compress_turns(&pending[..fold])
    );
    let summary = match session.summary.trim_end() {
        "" => block,
        existing => format!("{existing}\n\n{block}"),
    };
    Some((summary, session.summarized_through + fold))
}

/// Append a turn, then fold old turns into the summary if the policy asks for it.
pub async fn append_with_summary(
    store: &dyn SessionStore,
    id: &SessionId,
    turn: Turn,
    policy: SummaryPolicy,
) -> Result<Session> {
    let session = store.append_turn(id, turn).await?;
    match plan_auto_summary(&session, policy, crate::util::now()) {
        Some((summary, through)) => {
            tracing::info!(
                session_id = %id,
                folded = through - session.summarized_through,
                "Auto-summarizing older turns"
            );
            store.update_summary(id, summary, through).await
        }
        None => Ok(session),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{FileSessionStore, Role};
    use std::time::Duration;
    use tempfile::TempDir;

    fn session_with(n: usize) -> Session {
        let now = Utc::now();
        Session {
            session_id: SessionId::parse("s").unwrap(),
            server_id: "srv".into(),
            epoch: "e".into(),
            turns: (0..n)
                .map(|i| Turn {
                    role: Role::User,
                    content: format!("turn {i}"),
                    timestamp: now,
                })
                .collect(),
            summary: String::new(),
            summarized_through: 0,
            state: serde_json::Value::Null,
            created_at: now,
            last_updated: now,
        }
    }

    const POLICY: SummaryPolicy = SummaryPolicy {
        max_turns: 4,
        keep_recent: 2,
    };

    #[test]
    fn below_threshold_does_nothing() {
        assert!(plan_auto_summary(&session_with(4), POLICY, Utc::now()).is_none());
    }

    #[test]
    fn over_threshold_folds_all_but_recent() {
        let (summary, through) = plan_auto_summary(&session_with(5), POLICY, Utc::now()).unwrap();
        assert_eq!(through, 3);
        assert!(summary.starts_with("[Auto summary @ "));
        assert!(summary.contains("- user: turn 0"));
        assert!(summary.contains("- user: turn 2"));
        assert!(!summary.contains("turn 3"));
    }

    #[test]
    fn new_block_is_appended_to_existing_summary() {
        let mut session = session_with(8);
        session.summary = "earlier notes".into();
        session.summarized_through = 3;

        let (summary, through) = plan_auto_summary(&session, POLICY, Utc::now()).unwrap();
        assert!(summary.starts_with("earlier notes\n\n[Auto summary"));
        assert!(summary.contains("turn 3"));
        assert!(!summary.contains("turn 0"));
        assert_eq!(through, 6);
    }

    #[test]
    fn long_turns_are_truncated() {
        let mut session = session_with(5);
        session.turns[0].content = "x".repeat(500);
        let (summary, _) = plan_auto_summary(&session, POLICY, Utc::now()).unwrap();
        let line = summary.lines().nth(1).unwrap();
        assert_eq!(line, format!("- user: {}...", "x".repeat(TURN_SNIPPET_CHARS)));
    }

    #[tokio::test]
    async fn append_with_summary_keeps_every_turn() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path(), Duration::from_millis(500));
        let id = SessionId::parse("s").unwrap();
        store.create(&id, "srv", false).await.unwrap();

        let mut last = None;
        for i in 0..6 {
            last = Some(
                append_with_summary(&store, &id, Turn::new(Role::User, format!("m{i}")), POLICY)
                    .await
                    .unwrap(),
            );
        }
        let session = last.unwrap();
        assert_eq!(session.turns.len(), 6);
        assert_eq!(session.summarized_through, 3);
        assert_eq!(session.unsummarized_turns().len(), 3);
        assert!(session.summary.contains("- user: m0"));
    }
}
