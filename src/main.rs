#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::doc_markdown,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

use memora::config::mask_secret;
use memora::context::build_prompt;
use memora::llm::{Responder, ShellResponder};
use memora::memory::open_longterm_store;
use memora::remote::{create_remote_store, RetryPolicy};
use memora::resume::{create_multiplexer, ResumeManager};
use memora::sessions::{
    append_with_summary, create_session_store, Role, SessionId, SessionStore, SummaryPolicy, Turn,
};
use memora::sync::{SessionPullOutcome, SyncEngine};
use memora::{BackupCommands, Config, MemoraError, MemoryCommands};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `Memora` - stateful workspace memory for AI coding assistants.
#[derive(Parser, Debug)]
#[command(name = "memora")]
#[command(version)]
#[command(about = "Local-first session and long-term memory with backup and tmux resume.", long_about = None)]
struct Cli {
    /// Workspace root (sets MEMORA_HOME; default: ./.memora)
    #[arg(long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// First-run setup: create the workspace and a session, then report readiness
    Init {
        #[arg(long)]
        session_id: Option<String>,
        /// Start a fresh transcript even if the session exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Create or reopen a session and make it active
    #[command(long_about = "\
Create or reopen a session and make it active.

Without --session-id the session is named after today's date. \
Reopening an existing session keeps its transcript unless \
--overwrite is given.

Examples:
  memora start
  memora start --session-id feature-x
  memora start --session-id feature-x --overwrite")]
    Start {
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },

    /// Append a turn to the active session
    Add {
        /// user, assistant or system
        #[arg(long)]
        role: String,
        #[arg(long)]
        content: String,
    },

    /// Record a request, run the configured command on the full prompt and record its reply
    #[command(long_about = "\
Record a request and ask the configured language-model command.

The prompt is the memory block (core memory, session summary, recent \
conversation, relevant long-term entries) followed by the request. \
It is written to the command's stdin; stdout (else stderr) is \
recorded as the assistant turn and the command's exit code is \
returned.

Examples:
  memora ask \"summarize the current task\"
  memora ask \"what did we decide about retries?\" --cmd \"codex exec -\"
  memora ask \"draft a plan\" --dry-run")]
    Ask {
        user_input: String,
        /// Shell command reading the prompt on stdin (default: MEMORA_LLM_CMD, [llm] command, then `cat`)
        #[arg(long)]
        cmd: Option<String>,
        /// Print the prompt instead of running the command
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the prompt `ask` would send, without recording anything
    Build {
        #[arg(long)]
        user_input: String,
    },

    /// Print the active session as JSON
    Show,

    /// Summarize the active session
    Status,

    /// Reattach to, or rebuild, the multiplexer session of a session
    #[command(long_about = "\
Reattach to, or rebuild, the tmux session of a session.

If `memora-<session id>` is alive it is reused. Otherwise a new \
detached session is created and the saved summary and recent turns \
are printed into it; an optional bootstrap command follows. Ctrl-C \
during that step removes the half-built session.

Examples:
  memora resume --attach
  memora resume --session-id feature-x --command \"codex\"")]
    Resume {
        #[arg(long)]
        session_id: Option<String>,
        /// Command to run in a rebuilt session (default: [resume] bootstrap_command)
        #[arg(long)]
        command: Option<String>,
        /// Attach the terminal once the session is ready
        #[arg(long)]
        attach: bool,
    },

    /// Show the multiplexer name mapping and live sessions
    TmuxStatus {
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Back up to, or restore from, the remote
    Backup {
        #[command(subcommand)]
        backup_command: BackupCommands,
    },

    /// Manage long-term memory (add, list, get, stats)
    #[command(long_about = "\
Manage long-term memory entries.

Entries are keyed by the hash of their text, so adding the same \
text twice stores it once.

Examples:
  memora memory add \"prefer explicit errors over panics\"
  memora memory add \"deploy via make release\" --metadata '{\"topic\":\"ops\"}'
  memora memory list --limit 10
  memora memory get <hash>
  memora memory stats")]
    Memory {
        #[command(subcommand)]
        memory_command: MemoryCommands,
    },

    /// Print the workspace root
    Where,

    /// Manage configuration
    #[command(long_about = "\
Manage Memora configuration.

Use 'schema' to dump the JSON Schema for config.toml, which documents \
every available key, type, and default value.

Examples:
  memora config schema
  memora config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `memora`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(memora completions bash)
  memora completions zsh > ~/.zfunc/_memora
  memora completions fish > ~/.config/fish/completions/memora.fish")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Completions must remain stdout-only and should not load config or initialize logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        return match write_shell_completion(*shell, &mut stdout) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => report(&e),
        };
    }

    // Stdout carries JSON reports, so logging defaults to warnings on stderr.
    let subscriber = fmt::Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to install log subscriber: {e}");
    }

    match run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code.clamp(1, 255)).unwrap_or(1)),
        Err(e) => report(&e),
    }
}

/// Kind name and exit code of the first `MemoraError` in the chain.
fn classify(err: &anyhow::Error) -> (&'static str, i32) {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MemoraError>())
        .map_or(("Error", 1), |e| (e.kind(), e.exit_code()))
}

/// Print `error[<kind>]: <message>` and exit with the kind's code.
fn report(err: &anyhow::Error) -> ExitCode {
    let (kind, code) = classify(err);
    eprintln!("error[{kind}]: {err:#}");
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The named session, else the active one.
async fn resolve_session(store: &dyn SessionStore, explicit: Option<&str>) -> Result<SessionId> {
    if let Some(raw) = explicit {
        return Ok(SessionId::parse(raw)?);
    }
    store.active().await?.ok_or_else(|| {
        MemoraError::NotFound("no active session; run `memora start` first".into()).into()
    })
}

/// The active session, created for today when there is none yet.
async fn active_or_default(store: &dyn SessionStore, config: &Config) -> Result<SessionId> {
    if let Some(id) = store.active().await? {
        if store.exists(&id).await {
            return Ok(id);
        }
    }
    let id = SessionId::default_for_today();
    store
        .create(&id, &config.effective_server_id(None), false)
        .await?;
    store.set_active(&id).await?;
    Ok(id)
}

async fn run(cli: Cli) -> Result<i32> {
    if let Some(workspace) = &cli.workspace {
        if workspace.trim().is_empty() {
            bail!("--workspace cannot be empty");
        }
        std::env::set_var("MEMORA_HOME", workspace);
    }

    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(Config);
        print_json(&schema)?;
        return Ok(0);
    }

    let config = Config::load_or_init().await?;
    let workspace = config.workspace();
    workspace
        .ensure_layout()
        .with_context(|| format!("Failed to prepare workspace {}", workspace.root().display()))?;
    let sessions = create_session_store(&config);
    let policy = SummaryPolicy::from(&config.store);

    match cli.command {
        Commands::Completions { .. } | Commands::Config { .. } => unreachable!(),

        Commands::Init {
            session_id,
            overwrite,
        } => {
            let id = match session_id.as_deref() {
                Some(raw) => SessionId::parse(raw)?,
                None => SessionId::default_for_today(),
            };
            let session = sessions
                .create(&id, &config.effective_server_id(None), overwrite)
                .await?;
            sessions.set_active(&id).await?;
            let mux = create_multiplexer(&config.resume)?;
            let missing = config.remote.missing_settings();
            print_json(&serde_json::json!({
                "ok": true,
                "workspace": workspace.root(),
                "session": session,
                "checks": {
                    "multiplexer": mux.name(),
                    "multiplexer_available": mux.is_available().await,
                    "remote_ready": missing.is_empty(),
                    "remote_url": config.remote.url,
                    "remote_service_key": mask_secret(config.remote.service_key.as_deref(), 4),
                    "missing_remote_settings": missing,
                },
                "next_commands": [
                    format!("memora ask \"summarize the current task\" --cmd \"{}\"", config.llm.effective_command()),
                    "memora status",
                    "memora where",
                    "memora backup push",
                ],
            }))?;
        }

        Commands::Start {
            session_id,
            overwrite,
        } => {
            let id = match session_id.as_deref() {
                Some(raw) => SessionId::parse(raw)?,
                None => SessionId::default_for_today(),
            };
            let session = sessions
                .create(&id, &config.effective_server_id(None), overwrite)
                .await?;
            sessions.set_active(&id).await?;
            print_json(&session)?;
        }

        Commands::Add { role, content } => {
            let role = Role::parse(&role)?;
            let id = active_or_default(&*sessions, &config).await?;
            let session =
                append_with_summary(&*sessions, &id, Turn::new(role, content), policy).await?;
            print_json(&session)?;
        }

        Commands::Ask {
            user_input,
            cmd,
            dry_run,
        } => {
            let id = active_or_default(&*sessions, &config).await?;
            let session = append_with_summary(
                &*sessions,
                &id,
                Turn::new(Role::User, user_input.clone()),
                policy,
            )
            .await?;
            let longterm = open_longterm_store(&config).await?;
            let core = workspace.core_memory().await?;
            let prompt = build_prompt(
                core.as_deref(),
                &session,
                longterm.list(&session.server_id),
                &user_input,
            );
            if dry_run {
                println!("{prompt}");
                return Ok(0);
            }

            let command = cmd
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| config.llm.effective_command().to_string());
            let responder = ShellResponder::new(command);
            let reply = responder.respond(&prompt).await?;
            append_with_summary(
                &*sessions,
                &id,
                Turn::new(Role::Assistant, reply.text()),
                policy,
            )
            .await?;
            println!("{}", reply.text());
            return Ok(reply.exit_code);
        }

        Commands::Build { user_input } => {
            let id = resolve_session(&*sessions, None).await?;
            let session = sessions.load(&id).await?;
            let longterm = open_longterm_store(&config).await?;
            let core = workspace.core_memory().await?;
            println!(
                "{}",
                build_prompt(
                    core.as_deref(),
                    &session,
                    longterm.list(&session.server_id),
                    &user_input,
                )
            );
        }

        Commands::Show => {
            let id = resolve_session(&*sessions, None).await?;
            print_json(&sessions.load(&id).await?)?;
        }

        Commands::Status => {
            let id = resolve_session(&*sessions, None).await?;
            let session = sessions.load(&id).await?;
            print_json(&serde_json::json!({
                "workspace": workspace.root(),
                "session_id": session.session_id,
                "server_id": session.server_id,
                "last_updated": session.last_updated,
                "conversation_turns": session.turns.len(),
                "summarized_through": session.summarized_through,
                "summary_chars": session.summary.chars().count(),
                "has_state": !session.state.is_null(),
            }))?;
        }

        Commands::Resume {
            session_id,
            command,
            attach,
        } => {
            let id = resolve_session(&*sessions, session_id.as_deref()).await?;
            let mux = create_multiplexer(&config.resume)?;
            let mut manager =
                ResumeManager::new(&*sessions, &*mux, workspace.sessions_dir(), &config.resume);
            if let Ok(cwd) = std::env::current_dir() {
                manager = manager.with_cwd(cwd);
            }
            let interrupt = async {
                // Without a signal handler there is nothing to race against.
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            let outcome = manager
                .resume(&id, command.as_deref(), attach, interrupt)
                .await?;
            print_json(&outcome)?;
        }

        Commands::TmuxStatus { session_id } => {
            let id = resolve_session(&*sessions, session_id.as_deref()).await?;
            let mux = create_multiplexer(&config.resume)?;
            let manager =
                ResumeManager::new(&*sessions, &*mux, workspace.sessions_dir(), &config.resume);
            print_json(&manager.status(&id).await?)?;
        }

        Commands::Backup { backup_command } => {
            let remote = create_remote_store(&config)?;
            let longterm = open_longterm_store(&config).await?;
            let engine = SyncEngine::new(
                &*sessions,
                &longterm,
                &*remote,
                RetryPolicy::from(&config.remote.retry),
            );
            match backup_command {
                BackupCommands::Push {
                    session_id,
                    server_id,
                } => {
                    let id = resolve_session(&*sessions, session_id.as_deref()).await?;
                    let server_id = config.effective_server_id(server_id.as_deref());
                    let report = engine.push(&id, &server_id).await?;
                    let complete = report.is_complete();
                    print_json(&serde_json::json!({
                        "ok": complete,
                        "mode": "backup_push",
                        "report": report,
                    }))?;
                    if !complete {
                        return Ok(1);
                    }
                }
                BackupCommands::Pull {
                    session_id,
                    server_id,
                } => {
                    let explicit = session_id.is_some();
                    let id = resolve_session(&*sessions, session_id.as_deref()).await?;
                    let existed = sessions.exists(&id).await;
                    let server_id = config.effective_server_id(server_id.as_deref());
                    let report = engine.pull(&id, &server_id).await?;
                    let missing = report.session == SessionPullOutcome::RemoteMissing;
                    print_json(&serde_json::json!({
                        "ok": !missing,
                        "mode": "backup_pull",
                        "report": report,
                    }))?;
                    if missing {
                        return Err(MemoraError::NotFound(format!(
                            "no remote session '{id}' for server '{server_id}'"
                        ))
                        .into());
                    }
                    if explicit && !existed {
                        sessions.set_active(&id).await?;
                    }
                }
                BackupCommands::Status { server_id, limit } => {
                    let server_id = config.effective_server_id(server_id.as_deref());
                    print_json(&engine.status(&server_id, limit).await?)?;
                }
            }
        }

        Commands::Memory { memory_command } => {
            memora::memory::handle_memory_command(memory_command, &config).await?;
        }

        Commands::Where => {
            println!("{}", workspace.root().display());
        }
    }
    Ok(0)
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
