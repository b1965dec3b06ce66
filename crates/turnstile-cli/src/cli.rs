//! CLI argument definitions for turnstile.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use turnstile_agent::PruningStrategy;
use turnstile_store::DEFAULT_SESSIONS_TO_KEEP;

/// turnstile -- turn processing and context pruning for coding agents.
#[derive(Parser)]
#[command(
    name = "turnstile",
    version,
    about = "turnstile -- inspect agent sessions and context budgets",
    long_about = "Manage saved agent sessions, preview how a conversation would be pruned \
                  for a provider, and estimate the token cost of context files."
)]
pub struct Cli {
    /// Agent configuration file (`.toml` or `.json`).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding session files (defaults to `~/.turnstile/sessions`).
    #[arg(long, global = true)]
    pub sessions_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage saved conversation sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show how a saved session would be pruned before the next request.
    Inspect {
        /// The session to inspect.
        session_id: String,

        /// Provider to evaluate against (defaults to the configured one).
        #[arg(long)]
        provider: Option<String>,

        /// Context window in tokens (defaults to the configured one).
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Pruning strategy to apply (defaults to the configured one).
        #[arg(long)]
        strategy: Option<PruningStrategy>,
    },

    /// Estimate the token cost of files used as prompt context.
    Estimate {
        /// Files to read.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Parallel reads (defaults to the configured value).
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

/// Actions for managing sessions.
#[derive(Subcommand)]
pub enum SessionAction {
    /// List all saved sessions, newest first.
    List,
    /// Show a session's summary and messages.
    Show {
        /// The session id to display.
        session_id: String,

        /// Print the raw session document as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete a session.
    Delete {
        /// The session id to delete.
        session_id: String,
    },
    /// Delete all but the newest sessions.
    Cleanup {
        /// Number of sessions to keep.
        #[arg(long, default_value_t = DEFAULT_SESSIONS_TO_KEEP)]
        keep: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inspect_overrides() {
        let cli = Cli::try_parse_from([
            "turnstile",
            "inspect",
            "abc",
            "--provider",
            "anthropic",
            "--max-tokens",
            "50000",
            "--strategy",
            "sliding-window",
        ])
        .unwrap();

        match cli.command {
            Commands::Inspect {
                session_id,
                provider,
                max_tokens,
                strategy,
            } => {
                assert_eq!(session_id, "abc");
                assert_eq!(provider.as_deref(), Some("anthropic"));
                assert_eq!(max_tokens, Some(50_000));
                assert_eq!(strategy, Some(PruningStrategy::SlidingWindow));
            }
            _ => panic!("expected inspect"),
        }
    }

    #[test]
    fn cleanup_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["turnstile", "sessions", "cleanup"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sessions {
                action: SessionAction::Cleanup { keep: 20 }
            }
        ));
    }

    #[test]
    fn estimate_requires_files() {
        assert!(Cli::try_parse_from(["turnstile", "estimate"]).is_err());
    }
}
