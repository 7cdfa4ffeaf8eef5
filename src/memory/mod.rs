pub mod longterm;

pub use longterm::{
    normalize_metadata, LongTermEntry, LongTermRecord, LongTermRow, LongTermStore, MergeOutcome,
};

use crate::config::Config;
use crate::error::MemoraError;
use crate::hashing::ContentHash;
use anyhow::{Context, Result};

/// Factory: open the long-term store of the configured workspace.
pub async fn open_longterm_store(config: &Config) -> Result<LongTermStore> {
    let store = LongTermStore::open(
        config.workspace().longterm_dir(),
        config.effective_server_id(None),
        config.store.lock_timeout(),
    )
    .await?;
    Ok(store)
}

fn parse_metadata(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| MemoraError::InvalidInput(format!("--metadata is not valid JSON: {e}")))
            .context("parsing long-term metadata"),
    }
}

/// Handle `memora memory <subcommand>` CLI commands.
pub async fn handle_memory_command(command: crate::MemoryCommands, config: &Config) -> Result<()> {
    let store = open_longterm_store(config).await?;
    match command {
        crate::MemoryCommands::Add {
            text,
            metadata,
            server_id,
        } => {
            let server_id = config.effective_server_id(server_id.as_deref());
            let metadata = parse_metadata(metadata.as_deref())?;
            let added = store.add(&server_id, &text, metadata).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "server_id": server_id,
                    "content_hash": added.content_hash,
                    "outcome": added.outcome,
                }))?
            );
        }
        crate::MemoryCommands::List {
            server_id,
            limit,
            offset,
        } => {
            let server_id = config.effective_server_id(server_id.as_deref());
            let entries = store.list(&server_id);
            let total = entries.total();
            if total == 0 {
                println!("No long-term entries for server '{server_id}'.");
                return Ok(());
            }
            let page: Vec<_> = entries.skip(offset).take(limit).collect();
            if page.is_empty() {
                println!("No entries at offset {offset} (total: {total}).");
                return Ok(());
            }
            println!(
                "Long-term entries for '{server_id}' ({total} total, showing {}-{}):\n",
                offset + 1,
                offset + page.len(),
            );
            for entry in &page {
                println!(
                    "- {} [{}]",
                    entry.content_hash.short(),
                    entry.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
                let line = entry.text.lines().next().unwrap_or(&entry.text);
                println!("    {}", crate::util::truncate_with_ellipsis(line, 77));
            }
            if offset + page.len() < total {
                println!("\n  Use --offset {} to see the next page.", offset + limit);
            }
        }
        crate::MemoryCommands::Get { hash, server_id } => {
            let server_id = config.effective_server_id(server_id.as_deref());
            let hash = ContentHash::parse(&hash)?;
            match store.find_by_hash(&server_id, &hash) {
                Some(entry) => {
                    println!("Hash:      {}", entry.content_hash);
                    println!("Server:    {}", entry.server_id);
                    println!("Updated:   {}", entry.updated_at.to_rfc3339());
                    if !entry.metadata.is_empty() {
                        println!(
                            "Metadata:  {}",
                            serde_json::Value::Object(entry.metadata.clone())
                        );
                    }
                    println!("\n{}", entry.text);
                }
                None => {
                    return Err(MemoraError::NotFound(format!(
                        "no long-term entry {hash} for server '{server_id}'"
                    ))
                    .into())
                }
            }
        }
        crate::MemoryCommands::Stats => {
            let stats = store.stats();
            println!("Long-term Memory Statistics:\n");
            println!("  Log:      {}", stats.path.display());
            println!("  Policy:   {}", crate::hashing::HASH_POLICY);
            println!("  Total:    {}", stats.total);
            if let Some(newest) = stats.newest {
                println!("  Newest:   {}", newest.to_rfc3339());
            }
            for (server_id, count) in &stats.per_server {
                println!("  {server_id}: {count}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir) -> Config {
        Config {
            workspace_dir: tmp.path().to_path_buf(),
            config_path: tmp.path().join("config.toml"),
            server_id: Some("srv".into()),
            ..Config::default()
        }
    }

    #[test]
    fn parse_metadata_accepts_json_and_rejects_garbage() {
        assert!(parse_metadata(None).unwrap().is_null());
        assert_eq!(parse_metadata(Some("{\"a\":1}")).unwrap()["a"], 1);

        let err = parse_metadata(Some("{oops")).unwrap_err();
        let kind = err.downcast_ref::<MemoraError>().map(MemoraError::kind);
        assert_eq!(kind, Some("InvalidInput"));
    }

    #[tokio::test]
    async fn add_command_then_factory_sees_entry() {
        let tmp = TempDir::new().unwrap();
        let config = config_in(&tmp);

        handle_memory_command(
            crate::MemoryCommands::Add {
                text: "remember me".into(),
                metadata: Some("{\"tag\":\"x\"}".into()),
                server_id: None,
            },
            &config,
        )
        .await
        .unwrap();

        let store = open_longterm_store(&config).await.unwrap();
        assert_eq!(store.count(Some("srv")), 1);
    }

    #[tokio::test]
    async fn get_unknown_hash_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let config = config_in(&tmp);
        let hash = crate::hashing::content_hash("never stored").to_string();

        let err = handle_memory_command(
            crate::MemoryCommands::Get {
                hash,
                server_id: None,
            },
            &config,
        )
        .await
        .unwrap_err();
        let kind = err.downcast_ref::<MemoraError>().map(MemoraError::kind);
        assert_eq!(kind, Some("NotFound"));
    }
}
