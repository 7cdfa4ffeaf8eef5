//! PostgREST client for a Supabase project.
//!
//! Endpoints are `<url>/rest/v1/<table>`. Every request carries the service
//! credential twice (`apikey` and bearer) and pins the schema through
//! `Accept-Profile`/`Content-Profile`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::wire::{self, LongTermInsert, LongTermRefresh, LongTermSelect, SessionRow};
use super::{RemoteSession, RemoteSessionInfo, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{MemoraError, Result};
use crate::memory::{LongTermEntry, LongTermRow};

const MAX_ERROR_BODY_CHARS: usize = 300;
const SESSION_COLUMNS: &str =
    "server_id,session_id,last_updated,summary,conversation,snapshot,created_at";
const LONGTERM_COLUMNS: &str = "content_hash,text,metadata,updated_at";

pub struct SupabaseRemote {
    base_url: String,
    service_key: String,
    schema: String,
    sessions_table: String,
    longterm_table: String,
    page_size: usize,
    client: Client,
}

impl SupabaseRemote {
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| MemoraError::InvalidInput("SUPABASE_URL is not set".into()))?;
        let service_key = config
            .service_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MemoraError::InvalidInput("SUPABASE_SERVICE_ROLE_KEY is not set".into()))?
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| MemoraError::InvalidInput(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            service_key,
            schema: config.schema.clone(),
            sessions_table: config.sessions_table.clone(),
            longterm_table: config.longterm_table.clone(),
            page_size: config.page_size.max(1),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Accept-Profile", &self.schema)
            .header("Content-Profile", &self.schema)
            .header("Accept", "application/json")
    }

    /// Scrub the credential from error bodies and cap their length.
    fn sanitize(&self, body: &str) -> String {
        let scrubbed = body.replace(&self.service_key, "[REDACTED]");
        crate::util::truncate_with_ellipsis(scrubbed.trim(), MAX_ERROR_BODY_CHARS)
    }

    async fn send(&self, what: &str, req: RequestBuilder) -> Result<Response> {
        let response = self
            .authed(req)
            .send()
            .await
            .map_err(|e| classify_transport(what, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read error body>".to_string());
        let detail = format!("{what} failed ({status}): {}", self.sanitize(&body));
        tracing::debug!(operation = what, status = status.as_u16(), "Remote request failed");
        if is_transient_status(status) {
            Err(MemoraError::NetworkTransient(detail))
        } else {
            Err(MemoraError::RemoteRejected(detail))
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, what: &str, req: RequestBuilder) -> Result<T> {
        let response = self.send(what, req).await?;
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(what, &e))?;
        serde_json::from_str(&body).map_err(|e| {
            MemoraError::RemoteRejected(format!("{what}: undecodable response body: {e}"))
        })
    }
}

/// 408, 429 and every 5xx are worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn classify_transport(what: &str, e: &reqwest::Error) -> MemoraError {
    if e.is_builder() {
        MemoraError::RemoteRejected(format!("{what}: invalid request: {e}"))
    } else {
        // Connect failures, timeouts, resets and truncated bodies.
        MemoraError::NetworkTransient(format!("{what}: {e}"))
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteStore for SupabaseRemote {
    async fn upsert_session(&self, session: &RemoteSession) -> Result<()> {
        let row = wire::encode_session(session);
        let req = self
            .client
            .post(self.table_url(&self.sessions_table))
            .query(&[("on_conflict", "server_id,session_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        self.send("upsert_session", req).await?;
        tracing::debug!(
            server_id = %session.server_id,
            session_id = %session.session_id,
            turns = session.turns.len(),
            "Session upserted"
        );
        Ok(())
    }

    async fn upsert_longterm(&self, entry: &LongTermEntry) -> Result<()> {
        let insert = self
            .client
            .post(self.table_url(&self.longterm_table))
            .query(&[("on_conflict", "server_id,content_hash")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&[LongTermInsert::from(entry)]);
        self.send("upsert_longterm insert", insert).await?;

        let refresh = self
            .client
            .patch(self.table_url(&self.longterm_table))
            .query(&[
                ("server_id", eq(&entry.server_id)),
                ("content_hash", eq(entry.content_hash.as_str())),
            ])
            .header("Prefer", "return=minimal")
            .json(&LongTermRefresh {
                metadata: &entry.metadata,
                updated_at: entry.updated_at,
            });
        self.send("upsert_longterm refresh", refresh).await?;
        Ok(())
    }

    async fn fetch_session(
        &self,
        server_id: &str,
        session_id: &str,
    ) -> Result<Option<RemoteSession>> {
        let req = self
            .client
            .get(self.table_url(&self.sessions_table))
            .query(&[
                ("server_id", eq(server_id)),
                ("session_id", eq(session_id)),
                ("select", SESSION_COLUMNS.to_string()),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<SessionRow> = self.fetch_json("fetch_session", req).await?;
        rows.into_iter().next().map(wire::decode_session).transpose()
    }

    async fn list_longterm(
        &self,
        server_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LongTermRow>> {
        let mut rows = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut query = vec![
                ("server_id", eq(server_id)),
                ("select", LONGTERM_COLUMNS.to_string()),
                ("order", "updated_at.desc,content_hash.asc".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ];
            if let Some(since) = since {
                query.push((
                    "updated_at",
                    format!("gt.{}", since.to_rfc3339_opts(SecondsFormat::Micros, true)),
                ));
            }
            let req = self
                .client
                .get(self.table_url(&self.longterm_table))
                .query(&query);
            let page: Vec<LongTermSelect> = self.fetch_json("list_longterm", req).await?;
            let fetched = page.len();
            rows.extend(page.into_iter().map(LongTermRow::from));
            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }
        tracing::debug!(server_id, rows = rows.len(), "Long-term rows listed");
        Ok(rows)
    }

    async fn list_sessions(&self, server_id: &str, limit: usize) -> Result<Vec<RemoteSessionInfo>> {
        #[derive(Deserialize)]
        struct Row {
            session_id: String,
            last_updated: DateTime<Utc>,
        }

        let req = self
            .client
            .get(self.table_url(&self.sessions_table))
            .query(&[
                ("server_id", eq(server_id)),
                ("select", "session_id,last_updated".to_string()),
                ("order", "last_updated.desc".to_string()),
                ("limit", limit.max(1).to_string()),
            ]);
        let rows: Vec<Row> = self.fetch_json("list_sessions", req).await?;
        Ok(rows
            .into_iter()
            .map(|r| RemoteSessionInfo {
                session_id: r.session_id,
                last_updated: r.last_updated,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "supabase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config_for(url: &str) -> RemoteConfig {
        RemoteConfig {
            url: Some(url.to_string()),
            service_key: Some("secret-service-key".into()),
            page_size: 2,
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
            ..RemoteConfig::default()
        }
    }

    /// Serve canned responses, one per connection, returning the raw requests.
    async fn serve(responses: Vec<(u16, String)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(head_end) = text.find("\r\n\r\n") {
                        let content_length = text[..head_end]
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if buf.len() >= head_end + 4 + content_length {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                requests.push(String::from_utf8_lossy(&buf).to_string());
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            requests
        });
        (url, handle)
    }

    #[test]
    fn from_config_trims_trailing_slash() {
        let remote = SupabaseRemote::from_config(&config_for("https://x.supabase.co/")).unwrap();
        assert_eq!(
            remote.table_url("ai_sessions"),
            "https://x.supabase.co/rest/v1/ai_sessions"
        );
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::CONFLICT));
    }

    #[test]
    fn sanitize_scrubs_key_and_truncates() {
        let remote = SupabaseRemote::from_config(&config_for("https://x.supabase.co")).unwrap();
        let out = remote.sanitize("bad key secret-service-key rejected");
        assert!(!out.contains("secret-service-key"));
        assert!(out.contains("[REDACTED]"));
        assert!(remote.sanitize(&"e".repeat(1000)).len() <= MAX_ERROR_BODY_CHARS + 3);
    }

    #[tokio::test]
    async fn upsert_session_sends_auth_and_conflict_headers() {
        let (url, server) = serve(vec![(201, String::new())]).await;
        let remote = SupabaseRemote::from_config(&config_for(&url)).unwrap();
        let session = RemoteSession {
            server_id: "srv".into(),
            session_id: "s1".into(),
            turns: Vec::new(),
            summary: String::new(),
            summarized_through: 0,
            state: serde_json::Value::Null,
            created_at: None,
            last_updated: crate::util::now(),
        };

        remote.upsert_session(&session).await.unwrap();
        let requests = server.await.unwrap();
        let request = requests[0].to_ascii_lowercase();
        assert!(request.starts_with("post /rest/v1/ai_sessions?on_conflict=server_id%2csession_id"));
        assert!(request.contains("apikey: secret-service-key"));
        assert!(request.contains("authorization: bearer secret-service-key"));
        assert!(request.contains("content-profile: public"));
        assert!(request.contains("prefer: resolution=merge-duplicates,return=minimal"));
    }

    #[tokio::test]
    async fn upsert_longterm_inserts_then_patches_without_text() {
        let (url, server) = serve(vec![(201, String::new()), (204, String::new())]).await;
        let remote = SupabaseRemote::from_config(&config_for(&url)).unwrap();
        let entry = LongTermEntry {
            server_id: "srv".into(),
            content_hash: crate::hashing::content_hash("fact"),
            text: "fact".into(),
            metadata: serde_json::Map::new(),
            updated_at: crate::util::now(),
        };

        remote.upsert_longterm(&entry).await.unwrap();
        let requests = server.await.unwrap();
        assert!(requests[0].to_ascii_lowercase().contains("resolution=ignore-duplicates"));
        assert!(requests[0].contains("\"text\":\"fact\""));
        assert!(requests[1].starts_with("PATCH "));
        assert!(!requests[1].contains("\"text\""));
    }

    #[tokio::test]
    async fn server_errors_are_transient_and_auth_errors_rejected() {
        let (url, _server) = serve(vec![
            (503, "{\"message\":\"unavailable\"}".into()),
            (401, "{\"message\":\"bad secret-service-key\"}".into()),
        ])
        .await;
        let remote = SupabaseRemote::from_config(&config_for(&url)).unwrap();

        let first = remote.fetch_session("srv", "s1").await.unwrap_err();
        assert_eq!(first.kind(), "NetworkTransient");

        let second = remote.fetch_session("srv", "s1").await.unwrap_err();
        assert_eq!(second.kind(), "RemoteRejected");
        assert!(!second.to_string().contains("secret-service-key"));
    }

    #[tokio::test]
    async fn fetch_session_missing_row_is_none_and_garbage_is_rejected() {
        let (url, _server) = serve(vec![(200, "[]".into()), (200, "<html>".into())]).await;
        let remote = SupabaseRemote::from_config(&config_for(&url)).unwrap();

        assert!(remote.fetch_session("srv", "s1").await.unwrap().is_none());
        let err = remote.fetch_session("srv", "s1").await.unwrap_err();
        assert_eq!(err.kind(), "RemoteRejected");
    }

    #[tokio::test]
    async fn list_longterm_follows_pages() {
        let hash = |t: &str| crate::hashing::content_hash(t).to_string();
        let page1 = serde_json::json!([
            {"content_hash": hash("a"), "text": "a", "metadata": {}, "updated_at": "2026-01-02T00:00:00Z"},
            {"content_hash": hash("b"), "text": "b", "metadata": null, "updated_at": null}
        ]);
        let page2 = serde_json::json!([
            {"content_hash": hash("c"), "text": "c", "updated_at": "2026-01-01T00:00:00Z"}
        ]);
        let (url, server) = serve(vec![(200, page1.to_string()), (200, page2.to_string())]).await;
        let remote = SupabaseRemote::from_config(&config_for(&url)).unwrap();

        let rows = remote.list_longterm("srv", None).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].updated_at, DateTime::<Utc>::UNIX_EPOCH);

        let requests = server.await.unwrap();
        assert!(requests[0].contains("offset=0"));
        assert!(requests[1].contains("offset=2"));
        assert!(requests[0].contains("order=updated_at.desc"));
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let remote = SupabaseRemote::from_config(&config_for(&url)).unwrap();
        let err = remote.list_sessions("srv", 5).await.unwrap_err();
        assert_eq!(err.kind(), "NetworkTransient");
    }
}
