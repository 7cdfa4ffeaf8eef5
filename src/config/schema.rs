use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
#[cfg(unix)]
use tokio::fs;

use super::workspace::Workspace;
use crate::store::write_atomic;

const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_WORKSPACE_DIR_NAME: &str = ".memora";
const FALLBACK_SERVER_ID: &str = "default-server";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level Memora configuration, loaded from `<workspace>/config.toml`.
///
/// Resolution order for the workspace: `MEMORA_HOME` env → `<cwd>/.memora`.
/// Constructed once per process and passed down explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Workspace root - resolved at load time, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - resolved at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Logical machine namespace for remote rows. Overridden by `SUPABASE_SERVER_ID`.
    /// Default: host name.
    #[serde(default)]
    pub server_id: Option<String>,

    /// Remote backup target (`[remote]`).
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Local store tuning (`[store]`).
    #[serde(default)]
    pub store: StoreConfig,

    /// Terminal multiplexer resume settings (`[resume]`).
    #[serde(default)]
    pub resume: ResumeConfig,

    /// External language-model command used by `ask` (`[llm]`).
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Remote relational backend reached over PostgREST (`[remote]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteConfig {
    /// Project base URL (e.g. `https://xyz.supabase.co`). Overridden by `SUPABASE_URL`.
    #[serde(default)]
    pub url: Option<String>,
    /// Service credential. Overridden by `SUPABASE_SERVICE_ROLE_KEY`.
    #[serde(default)]
    pub service_key: Option<String>,
    /// Postgres schema exposed through the REST API. Default: `public`.
    #[serde(default = "default_remote_schema")]
    pub schema: String,
    /// Sessions table. Default: `ai_sessions`.
    #[serde(default = "default_sessions_table")]
    pub sessions_table: String,
    /// Long-term table. Default: `ai_longterm`.
    #[serde(default = "default_longterm_table")]
    pub longterm_table: String,
    /// Per-request timeout in seconds. Default: `20`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds. Default: `10`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Rows per page when listing long-term entries. Default: `1000`.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Retry policy for transient failures (`[remote.retry]`).
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_remote_schema() -> String {
    "public".into()
}

fn default_sessions_table() -> String {
    "ai_sessions".into()
}

fn default_longterm_table() -> String {
    "ai_longterm".into()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> usize {
    1000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_key: None,
            schema: default_remote_schema(),
            sessions_table: default_sessions_table(),
            longterm_table: default_longterm_table(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            page_size: default_page_size(),
            retry: RetryConfig::default(),
        }
    }
}

impl RemoteConfig {
    /// Names of required settings that are still missing, in env-var form.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.url.as_deref().map_or(true, |v| v.trim().is_empty()) {
            missing.push("SUPABASE_URL");
        }
        if self
            .service_key
            .as_deref()
            .map_or(true, |v| v.trim().is_empty())
        {
            missing.push("SUPABASE_SERVICE_ROLE_KEY");
        }
        missing
    }
}

/// Bounded exponential backoff (`[remote.retry]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryConfig {
    /// Total attempts including the first. Default: `4`.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled after each failure. Default: `250`.
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on a single delay. Default: `4000`.
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_initial_backoff_ms() -> u64 {
    250
}

fn default_retry_max_backoff_ms() -> u64 {
    4000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
        }
    }
}

/// Local store tuning (`[store]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// How long a mutation waits for another invocation's lock. Default: `5000`.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Unsummarized turns allowed before older ones are folded into the summary. Default: `20`.
    #[serde(default = "default_max_conversation_turns")]
    pub max_conversation_turns: usize,
    /// Turns left outside the summary after folding. Default: `10`.
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_max_conversation_turns() -> usize {
    20
}

fn default_keep_recent_turns() -> usize {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            max_conversation_turns: default_max_conversation_turns(),
            keep_recent_turns: default_keep_recent_turns(),
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Terminal multiplexer resume (`[resume]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResumeConfig {
    /// Multiplexer binary. Default: `tmux`.
    #[serde(default = "default_multiplexer")]
    pub multiplexer: String,
    /// Recent turns replayed into a recreated session. Default: `10`.
    #[serde(default = "default_replay_turns")]
    pub replay_turns: usize,
    /// Command sent to a recreated session after the context replay.
    #[serde(default)]
    pub bootstrap_command: Option<String>,
}

fn default_multiplexer() -> String {
    "tmux".into()
}

fn default_replay_turns() -> usize {
    10
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            multiplexer: default_multiplexer(),
            replay_turns: default_replay_turns(),
            bootstrap_command: None,
        }
    }
}

/// External language-model command (`[llm]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LlmConfig {
    /// Shell command reading the prompt on stdin. Overridden by `MEMORA_LLM_CMD`. Default: `cat`.
    #[serde(default)]
    pub command: Option<String>,
}

impl LlmConfig {
    pub fn effective_command(&self) -> &str {
        self.command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("cat")
    }
}

impl Default for Config {
    fn default() -> Self {
        let workspace_dir = PathBuf::from(DEFAULT_WORKSPACE_DIR_NAME);
        Self {
            config_path: workspace_dir.join(CONFIG_FILE_NAME),
            workspace_dir,
            server_id: None,
            remote: RemoteConfig::default(),
            store: StoreConfig::default(),
            resume: ResumeConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceResolutionSource {
    EnvHome,
    CurrentDir,
}

impl WorkspaceResolutionSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::EnvHome => "MEMORA_HOME",
            Self::CurrentDir => "cwd",
        }
    }
}

fn resolve_workspace_dir() -> Result<(PathBuf, WorkspaceResolutionSource)> {
    if let Ok(home) = std::env::var("MEMORA_HOME") {
        let home = home.trim();
        if !home.is_empty() {
            let expanded = shellexpand::tilde(home).into_owned();
            return Ok((PathBuf::from(expanded), WorkspaceResolutionSource::EnvHome));
        }
    }
    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    Ok((
        cwd.join(DEFAULT_WORKSPACE_DIR_NAME),
        WorkspaceResolutionSource::CurrentDir,
    ))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Mask a secret for display, keeping the last `keep` chars.
pub fn mask_secret(value: Option<&str>, keep: usize) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= keep {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - keep..].iter().collect();
    format!("{}{visible}", "*".repeat(chars.len() - keep))
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let (workspace_dir, source) = resolve_workspace_dir()?;
        let config = Self::load_or_init_at(&workspace_dir).await?;
        tracing::info!(
            path = %config.config_path.display(),
            workspace = %config.workspace_dir.display(),
            source = source.as_str(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Load `<workspace_dir>/config.toml`, creating it with defaults when absent.
    pub async fn load_or_init_at(workspace_dir: &Path) -> Result<Self> {
        let config_path = workspace_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(workspace_dir).await.with_context(|| {
            format!(
                "Failed to create workspace directory: {}",
                workspace_dir.display()
            )
        })?;

        let mut config = if config_path.exists() {
            // Warn if config file is world-readable (may contain the service key)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config.workspace_dir = workspace_dir.to_path_buf();
            config
        } else {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.workspace_dir = workspace_dir.to_path_buf();
            config.save().await?;

            // Restrict permissions on newly created config file (may contain the service key)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Validate values that would otherwise fail deep inside a sync or store call.
    pub fn validate(&self) -> Result<()> {
        if self.remote.retry.max_attempts == 0 {
            anyhow::bail!("remote.retry.max_attempts must be greater than 0");
        }
        if self.remote.retry.initial_backoff_ms > self.remote.retry.max_backoff_ms {
            anyhow::bail!("remote.retry.initial_backoff_ms must not exceed remote.retry.max_backoff_ms");
        }
        if self.remote.page_size == 0 {
            anyhow::bail!("remote.page_size must be greater than 0");
        }
        if self.store.lock_timeout_ms == 0 {
            anyhow::bail!("store.lock_timeout_ms must be greater than 0");
        }
        if self.store.keep_recent_turns >= self.store.max_conversation_turns {
            anyhow::bail!(
                "store.keep_recent_turns ({}) must be lower than store.max_conversation_turns ({})",
                self.store.keep_recent_turns,
                self.store.max_conversation_turns
            );
        }
        if self.resume.multiplexer.trim().is_empty() {
            anyhow::bail!("resume.multiplexer must not be empty");
        }
        if let Some(url) = self.remote.url.as_deref() {
            let url = url.trim();
            if !url.is_empty() && reqwest::Url::parse(url).is_err() {
                anyhow::bail!("remote.url is not a valid URL: {url}");
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = non_empty(lookup("SUPABASE_URL")) {
            self.remote.url = Some(url);
        }
        if let Some(key) = non_empty(lookup("SUPABASE_SERVICE_ROLE_KEY")) {
            self.remote.service_key = Some(key);
        }
        if let Some(schema) = non_empty(lookup("SUPABASE_SCHEMA")) {
            self.remote.schema = schema;
        }
        if let Some(server_id) = non_empty(lookup("SUPABASE_SERVER_ID")) {
            self.server_id = Some(server_id);
        }
        if let Some(cmd) = non_empty(lookup("MEMORA_LLM_CMD")) {
            self.llm.command = Some(cmd);
        }
        if let Some(raw) = non_empty(lookup("MEMORA_LOCK_TIMEOUT_MS")) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => self.store.lock_timeout_ms = ms,
                _ => tracing::warn!(value = %raw, "Ignoring invalid MEMORA_LOCK_TIMEOUT_MS"),
            }
        }
        if let Some(url) = self.remote.url.as_mut() {
            *url = url.trim_end_matches('/').to_string();
        }
    }

    /// Server identity: explicit override → config → host name → `default-server`.
    pub fn effective_server_id(&self, override_id: Option<&str>) -> String {
        if let Some(id) = override_id.map(str::trim).filter(|v| !v.is_empty()) {
            return id.to_string();
        }
        if let Some(id) = self.server_id.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            return id.to_string();
        }
        hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| FALLBACK_SERVER_ID.to_string())
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.workspace_dir.clone())
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        write_atomic(&self.config_path, toml_str.as_bytes()).with_context(|| {
            format!(
                "Failed to atomically replace config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
