//! Append-only JSON Lines log of per-turn evaluation records.
//!
//! Logging is opt-in: [`TurnLog::from_env`] reads the path from
//! [`TURN_LOG_ENV`] and returns a disabled log when the variable is unset or
//! empty.  Appending to a disabled log is a no-op, not an error.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreResult;

/// Environment variable naming the turn log file.
pub const TURN_LOG_ENV: &str = "TURNSTILE_TURN_LOG";

/// Writer for the turn log.
#[derive(Debug, Clone, Default)]
pub struct TurnLog {
    path: Option<PathBuf>,
}

impl TurnLog {
    /// A log that discards every record.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// A log appending to `path`.
    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Build the log from [`TURN_LOG_ENV`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the log from [`TURN_LOG_ENV`] as resolved by `lookup`.
    pub fn from_lookup(lookup: impl FnOnce(&str) -> Option<String>) -> Self {
        match lookup(TURN_LOG_ENV) {
            Some(path) if !path.trim().is_empty() => Self::to_path(path.trim()),
            _ => Self::disabled(),
        }
    }

    /// Whether records are actually written.
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// The target file, if logging is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Serialize `record` as one JSON line and append it to the log file.
    pub async fn append<T: Serialize>(&self, record: &T) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(path = %path.display(), bytes = line.len(), "turn record appended");
        Ok(())
    }
}
