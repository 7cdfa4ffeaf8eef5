#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_wraps,
    dead_code
)]

use clap::Subcommand;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod context;
pub mod error;
pub mod hashing;
pub mod llm;
pub mod memory;
pub mod remote;
pub mod resume;
pub mod sessions;
pub mod store;
pub mod sync;
pub mod util;

pub use config::Config;
pub use error::{MemoraError, Result};

/// Backup subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackupCommands {
    /// Mirror the session and every long-term entry to the remote
    #[command(long_about = "\
Mirror a session and the server's long-term entries to the remote.

Local content always wins. Pushing the same state twice leaves the \
remote unchanged. Long-term rows that fail are reported and the \
rest of the batch continues.

Examples:
  memora backup push
  memora backup push --session-id 2026-10-19-default --server-id laptop")]
    Push {
        /// Session to push (default: the active session)
        #[arg(long)]
        session_id: Option<String>,
        /// Server namespace (default: SUPABASE_SERVER_ID, config, then host name)
        #[arg(long)]
        server_id: Option<String>,
    },
    /// Restore a session if the remote copy is newer and merge long-term entries
    #[command(long_about = "\
Restore a session from the remote.

The local session is replaced only when the remote copy is strictly \
newer. Long-term entries are merged by content hash; nothing local \
is ever deleted.

Examples:
  memora backup pull
  memora backup pull --session-id s1 --server-id laptop")]
    Pull {
        /// Session to pull (default: the active session)
        #[arg(long)]
        session_id: Option<String>,
        /// Server namespace (default: SUPABASE_SERVER_ID, config, then host name)
        #[arg(long)]
        server_id: Option<String>,
    },
    /// Compare local and remote sessions without changing anything
    Status {
        /// Server namespace (default: SUPABASE_SERVER_ID, config, then host name)
        #[arg(long)]
        server_id: Option<String>,
        /// Most recent remote sessions to compare
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

/// Long-term memory subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemoryCommands {
    /// Add a long-term entry; identical text is stored once
    Add {
        /// Entry text
        text: String,
        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
        /// Server namespace
        #[arg(long)]
        server_id: Option<String>,
    },
    /// List long-term entries, newest first
    List {
        /// Server namespace
        #[arg(long)]
        server_id: Option<String>,
        /// Maximum number of entries to display
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Number of entries to skip (for pagination)
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Show one entry by content hash
    Get {
        /// Full content hash
        hash: String,
        /// Server namespace
        #[arg(long)]
        server_id: Option<String>,
    },
    /// Show long-term store statistics
    Stats,
}
