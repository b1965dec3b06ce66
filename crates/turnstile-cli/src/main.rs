//! CLI entry point for turnstile.
//!
//! This binary provides the `turnstile` command with subcommands for
//! managing saved sessions, previewing context pruning, and estimating the
//! token cost of context files.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use turnstile_agent::{
    AgentConfig, ContextLoader, ConversationPruner, ConversationState, Message, Provider,
    PruningStrategy, Role, TokenEstimator, is_well_paired,
};
use turnstile_store::SessionStore;

use crate::cli::{Cli, Commands, SessionAction};

const PREVIEW_CHARS: usize = 120;
/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_LEVEL: &str = "info";

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    init_tracing(DEFAULT_LOG_LEVEL);

    let config = load_config(&cli)?;
    let store = match &cli.sessions_dir {
        Some(dir) => SessionStore::new(dir),
        None => SessionStore::open_default().context("failed to locate the sessions directory")?,
    };
    debug!(dir = %store.dir().display(), "session store ready");

    match cli.command {
        Commands::Sessions { action } => cmd_sessions(&store, action).await,
        Commands::Inspect {
            session_id,
            provider,
            max_tokens,
            strategy,
        } => cmd_inspect(&config, &store, &session_id, provider, max_tokens, strategy).await,
        Commands::Estimate { files, concurrency } => {
            cmd_estimate(&config, &files, concurrency).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AgentConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid TURNSTILE_* environment override")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Subcommand: sessions
// ---------------------------------------------------------------------------

async fn cmd_sessions(store: &SessionStore, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::List => {
            let sessions = store.list().await.context("failed to list sessions")?;
            if sessions.is_empty() {
                println!("  No saved sessions in {}", store.dir().display());
                return Ok(());
            }
            println!();
            println!("  {:<34} {:<20} NAME", "SESSION", "UPDATED");
            for session in sessions {
                println!(
                    "  {:<34} {:<20} {}",
                    session.session_id,
                    session.last_updated.format("%Y-%m-%d %H:%M:%S"),
                    session.name.as_deref().unwrap_or("-"),
                );
            }
            println!();
        }
        SessionAction::Show { session_id, json } => {
            let state = ConversationState::load(store, &session_id)
                .await
                .with_context(|| format!("failed to load session '{session_id}'"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
                return Ok(());
            }

            println!();
            println!("  Session {}", state.session_id);
            println!("  Updated:  {}", state.last_updated.format("%Y-%m-%d %H:%M:%S"));
            println!("  Messages: {}", state.messages.len());
            println!(
                "  Tokens:   {} (prompt {}, completion {}, cached {})",
                state.total_tokens, state.prompt_tokens, state.completion_tokens, state.cached_tokens
            );
            println!();
            for line in state.summary().lines() {
                println!("  {line}");
            }
            println!();
            for (i, message) in state.messages.iter().enumerate() {
                println!("  [{i:>3}] {}", describe(message));
            }
            println!();
        }
        SessionAction::Delete { session_id } => {
            store
                .delete(&session_id)
                .await
                .with_context(|| format!("failed to delete session '{session_id}'"))?;
            println!("  Deleted session {session_id}");
        }
        SessionAction::Cleanup { keep } => {
            let removed = store.cleanup(keep).await.context("session cleanup failed")?;
            info!(removed = removed.len(), keep, "sessions cleaned up");
            println!("  Removed {} session(s), kept the newest {keep}", removed.len());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: inspect
// ---------------------------------------------------------------------------

async fn cmd_inspect(
    config: &AgentConfig,
    store: &SessionStore,
    session_id: &str,
    provider: Option<String>,
    max_tokens: Option<usize>,
    strategy: Option<PruningStrategy>,
) -> Result<()> {
    let state = ConversationState::load(store, session_id)
        .await
        .with_context(|| format!("failed to load session '{session_id}'"))?;

    let provider = provider.map_or_else(|| config.provider(), |name| Provider::new(name, &config.model));
    let max = max_tokens.unwrap_or(config.max_context_tokens);
    let strategy = strategy.unwrap_or(config.strategy);

    let estimator = Arc::new(TokenEstimator::new(config.token_cache_bytes));
    let pruner = ConversationPruner::new(strategy, Arc::clone(&estimator));

    let mut request = Vec::with_capacity(state.messages.len() + 1);
    request.push(Message::system(config.system_prompt.clone()));
    request.extend(
        state
            .messages
            .iter()
            .filter(|m| !(m.role == Role::System && m.content.trim() == config.system_prompt.trim()))
            .cloned(),
    );

    let current = estimator.estimate_request(&request);
    let should = pruner.should_prune(current, max, &provider);
    let usage = if max == 0 { 0.0 } else { current as f64 / max as f64 * 100.0 };

    println!();
    println!("  Session:   {}", state.session_id);
    println!("  Provider:  {provider} ({:?})", provider.class());
    println!("  Strategy:  {strategy}");
    println!("  Window:    {max} tokens");
    println!("  Request:   {} messages, ~{current} tokens ({usage:.1}%)", request.len());

    if !should {
        println!("  Pruning:   not needed");
        println!();
        return Ok(());
    }

    let pruned = pruner.prune(&request, current, max, &provider);
    let after = estimator.estimate_request(&pruned);
    println!(
        "  Pruned:    {} messages, ~{after} tokens ({} dropped)",
        pruned.len(),
        request.len().saturating_sub(pruned.len())
    );
    println!(
        "  Pairing:   {}",
        if is_well_paired(&pruned) { "intact" } else { "BROKEN" }
    );
    println!("  Estimator: {}", estimator.stats());
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: estimate
// ---------------------------------------------------------------------------

async fn cmd_estimate(
    config: &AgentConfig,
    files: &[std::path::PathBuf],
    concurrency: Option<usize>,
) -> Result<()> {
    let estimator = Arc::new(TokenEstimator::new(config.token_cache_bytes));
    let loader = ContextLoader::new(
        Arc::clone(&estimator),
        concurrency.unwrap_or(config.context_concurrency),
    );
    let loaded = loader.load(files).await.context("failed to load context files")?;

    println!();
    let mut total = 0;
    for file in &loaded {
        match &file.content {
            Ok(_) => {
                total += file.tokens;
                println!("  {:>8}  {}", file.tokens, file.path.display());
            }
            Err(e) => println!("  {:>8}  {} ({e})", "ERROR", file.path.display()),
        }
    }
    println!("  {:>8}  total", total);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// One-line description of a stored message.
fn describe(message: &Message) -> String {
    let mut line = format!("{:<9}", message.role.as_str());
    if let Some(id) = &message.tool_call_id {
        line.push_str(&format!(" ({id})"));
    }
    if !message.tool_calls.is_empty() {
        let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
        line.push_str(&format!(" calls [{}]", names.join(", ")));
    }
    let text = message.content.replace('\n', " ");
    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if !preview.is_empty() {
        line.push(' ');
        line.push_str(&preview);
        if text.chars().count() > PREVIEW_CHARS {
            line.push_str("...");
        }
    }
    line
}

/// Initialize the tracing subscriber with the given default log level.
///
/// Respects the `RUST_LOG` environment variable if set; otherwise falls
/// back to `default_level`.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_agent::ToolCall;

    #[test]
    fn default_log_level_is_info() {
        assert_eq!(DEFAULT_LOG_LEVEL, "info");
        assert_eq!(EnvFilter::new(DEFAULT_LOG_LEVEL).to_string(), "info");
    }

    #[test]
    fn describe_shows_calls_and_truncates() {
        let call = Message::assistant_tool_calls(
            "x".repeat(200),
            vec![ToolCall::new("c1", "read_file", "{}")],
        );
        let line = describe(&call);
        assert!(line.starts_with("assistant"));
        assert!(line.contains("calls [read_file]"));
        assert!(line.ends_with("..."));

        let result = describe(&Message::tool_result("c1", "ok"));
        assert!(result.contains("(c1) ok"));
    }
}
