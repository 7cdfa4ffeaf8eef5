//! Full backup and restore cycle driven through the public library API.

use memora::memory::open_longterm_store;
use memora::remote::{InMemoryRemote, RemoteStore, RetryPolicy};
use memora::sessions::{create_session_store, Role, SessionId, SessionStore, Turn};
use memora::sync::{SessionPullOutcome, SyncCursor, SyncEngine};
use memora::Config;
use serde_json::{json, Value};
use tempfile::TempDir;

async fn workspace() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::load_or_init_at(tmp.path()).await.unwrap();
    config.server_id = Some("laptop".into());
    config.workspace().ensure_layout().unwrap();
    (tmp, config)
}

#[tokio::test]
async fn start_ask_push_edit_pull_round_trip() {
    let (_tmp, config) = workspace().await;
    let sessions = create_session_store(&config);
    let longterm = open_longterm_store(&config).await.unwrap();
    let remote = InMemoryRemote::new();
    let engine = SyncEngine::new(&*sessions, &longterm, &remote, RetryPolicy::none());
    let server_id = config.effective_server_id(None);
    assert_eq!(server_id, "laptop");

    // start --session-id s1
    let id = SessionId::parse("s1").unwrap();
    sessions.create(&id, &server_id, false).await.unwrap();
    sessions.set_active(&id).await.unwrap();

    // ask "hello"
    sessions
        .append_turn(&id, Turn::new(Role::User, "hello"))
        .await
        .unwrap();
    longterm
        .add(&server_id, "the build uses cargo", Value::Null)
        .await
        .unwrap();

    // backup push
    let pushed = engine.push(&id, &server_id).await.unwrap();
    assert!(pushed.is_complete());
    assert_eq!(pushed.turns, 1);
    assert_eq!(pushed.longterm_pushed, 1);

    // another machine answers and bumps last_updated
    let mut row = remote.session_row(&server_id, "s1").unwrap();
    row.conversation
        .as_array_mut()
        .unwrap()
        .push(json!({"role": "assistant", "content": "hi from the desktop"}));
    row.last_updated += chrono::Duration::minutes(5);
    remote.put_session_row(row);

    // backup pull --session-id s1
    let pulled = engine.pull(&id, &server_id).await.unwrap();
    assert_eq!(pulled.cursor, Some(SyncCursor::RemoteAhead));
    assert!(matches!(
        pulled.session,
        SessionPullOutcome::Restored { turns: 2, .. }
    ));
    let local = sessions.load(&id).await.unwrap();
    let contents: Vec<_> = local.turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, ["hello", "hi from the desktop"]);
    assert_eq!(local.turns[1].role, Role::Assistant);

    // a second pull with no remote change is a no-op
    let again = engine.pull(&id, &server_id).await.unwrap();
    assert_eq!(again.session, SessionPullOutcome::UpToDate);
    assert_eq!(again.longterm.inserted, 0);
    assert_eq!(sessions.load(&id).await.unwrap(), local);
    assert_eq!(longterm.count(Some(&server_id)), 1);
}

#[tokio::test]
async fn a_second_workspace_restores_everything_from_the_remote() {
    let remote = InMemoryRemote::new();
    let id = SessionId::parse("shared").unwrap();

    let (_tmp_a, config_a) = workspace().await;
    let sessions_a = create_session_store(&config_a);
    let longterm_a = open_longterm_store(&config_a).await.unwrap();
    sessions_a.create(&id, "laptop", false).await.unwrap();
    sessions_a
        .append_turn(&id, Turn::new(Role::User, "remember the deploy key rotation"))
        .await
        .unwrap();
    sessions_a
        .write_snapshot(&id, json!({"cwd": "/srv/app"}))
        .await
        .unwrap();
    for text in ["rotate keys monthly", "deploys happen on fridays"] {
        longterm_a.add("laptop", text, Value::Null).await.unwrap();
    }
    SyncEngine::new(&*sessions_a, &longterm_a, &remote, RetryPolicy::none())
        .push(&id, "laptop")
        .await
        .unwrap();

    let (_tmp_b, config_b) = workspace().await;
    let sessions_b = create_session_store(&config_b);
    let longterm_b = open_longterm_store(&config_b).await.unwrap();
    let report = SyncEngine::new(&*sessions_b, &longterm_b, &remote, RetryPolicy::none())
        .pull(&id, "laptop")
        .await
        .unwrap();

    assert_eq!(report.cursor, Some(SyncCursor::RemoteOnly));
    assert_eq!(report.longterm.inserted, 2);
    let original = sessions_a.load(&id).await.unwrap();
    let restored = sessions_b.load(&id).await.unwrap();
    assert_eq!(restored.turns, original.turns);
    assert_eq!(restored.state, original.state);
    assert_eq!(restored.last_updated, original.last_updated);
    assert_eq!(longterm_b.count(Some("laptop")), 2);
}

#[tokio::test]
async fn sessions_of_other_servers_are_invisible() {
    let (_tmp, config) = workspace().await;
    let sessions = create_session_store(&config);
    let longterm = open_longterm_store(&config).await.unwrap();
    let remote = InMemoryRemote::new();
    let engine = SyncEngine::new(&*sessions, &longterm, &remote, RetryPolicy::none());

    let id = SessionId::parse("s1").unwrap();
    sessions.create(&id, "laptop", false).await.unwrap();
    engine.push(&id, "laptop").await.unwrap();

    assert!(remote.fetch_session("desktop", "s1").await.unwrap().is_none());
    let report = engine.pull(&id, "desktop").await.unwrap();
    assert_eq!(report.session, SessionPullOutcome::RemoteMissing);
}
