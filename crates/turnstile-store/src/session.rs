//! Session persistence for conversation state.
//!
//! Every session lives in its own pretty-printed JSON file named
//! `session_<id>.json` inside the store directory.  The store is generic over
//! the document type: callers hand in anything `Serialize` and read back
//! anything `DeserializeOwned`.  Only three header fields are interpreted here
//! (`session_id`, `name`, `last_updated`) so that listing and LRU cleanup work
//! without knowing the full schema.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{StoreError, StoreResult};

/// Number of sessions kept by [`SessionStore::cleanup`] when no explicit
/// limit is given.
pub const DEFAULT_SESSIONS_TO_KEEP: usize = 20;

const FILE_PREFIX: &str = "session_";
const FILE_SUFFIX: &str = ".json";

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Summary of a stored session, as returned by [`SessionStore::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// The session identifier (without the `session_` file prefix).
    pub session_id: String,
    /// Optional human-friendly name recorded in the session file.
    pub name: Option<String>,
    /// When the session was last written.  Falls back to the file's
    /// modification time when the document does not carry a timestamp.
    pub last_updated: DateTime<Utc>,
    /// Absolute path of the session file.
    pub path: PathBuf,
}

/// The subset of a session document the store needs to understand.
#[derive(Debug, Default, Deserialize)]
struct SessionHeader {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════════════════════════════════
//  SessionStore
// ═══════════════════════════════════════════════════════════════════════

/// Directory-backed store of session documents.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `dir`.  The directory is created lazily on the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a store at the default location, `~/.turnstile/sessions`.
    pub fn open_default() -> StoreResult<Self> {
        let home = dirs::home_dir().ok_or(StoreError::HomeDirUnavailable)?;
        Ok(Self::new(home.join(".turnstile").join("sessions")))
    }

    /// The directory this store reads and writes.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file that holds `session_id`.
    ///
    /// A leading `session_` prefix on the id is tolerated so that ids copied
    /// from file names resolve to the same file.
    pub fn session_path(&self, session_id: &str) -> StoreResult<PathBuf> {
        let id = normalize_id(session_id)?;
        Ok(self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}")))
    }

    /// Serialize `document` and write it as the session file for
    /// `session_id`, replacing any previous version.
    ///
    /// The write goes to a temporary sibling first and is then renamed into
    /// place, so readers never observe a half-written file.
    #[instrument(skip(self, document))]
    pub async fn save<T: Serialize>(&self, session_id: &str, document: &T) -> StoreResult<PathBuf> {
        let path = self.session_path(session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let data = serde_json::to_vec_pretty(document)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), bytes = data.len(), "session saved");
        Ok(path)
    }

    /// Load and deserialize the session file for `session_id`.
    #[instrument(skip(self))]
    pub async fn load<T: DeserializeOwned>(&self, session_id: &str) -> StoreResult<T> {
        let path = self.session_path(session_id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    entity: "session",
                    id: session_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let document = serde_json::from_slice(&data)?;
        debug!(path = %path.display(), "session loaded");
        Ok(document)
    }

    /// Whether a session file exists for `session_id`.
    pub async fn exists(&self, session_id: &str) -> StoreResult<bool> {
        let path = self.session_path(session_id)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// List all sessions, newest first.
    ///
    /// Files that cannot be parsed are still listed, using their modification
    /// time, so that a corrupted session can be found and deleted.
    #[instrument(skip(self))]
    pub async fn list(&self) -> StoreResult<Vec<SessionInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(session_id) = file_name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            else {
                continue;
            };

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let path = entry.path();
            let header = match tokio::fs::read(&path).await {
                Ok(data) => serde_json::from_slice::<SessionHeader>(&data).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "unreadable session header");
                    SessionHeader::default()
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read session file");
                    SessionHeader::default()
                }
            };

            sessions.push(SessionInfo {
                session_id: session_id.to_string(),
                name: header.name.filter(|n| !n.is_empty()),
                last_updated: header.last_updated.unwrap_or(modified),
                path,
            });
        }

        sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(sessions)
    }

    /// Delete the session file for `session_id`.
    #[instrument(skip(self))]
    pub async fn delete(&self, session_id: &str) -> StoreResult<()> {
        let path = self.session_path(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(session_id, "session deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete all but the `keep` most recently updated sessions.
    ///
    /// Returns the ids of the deleted sessions, oldest first.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, keep: usize) -> StoreResult<Vec<String>> {
        let sessions = self.list().await?;
        if sessions.len() <= keep {
            return Ok(Vec::new());
        }

        // `list` is newest first; everything past `keep` goes, oldest first.
        let mut deleted = Vec::with_capacity(sessions.len() - keep);
        for info in sessions[keep..].iter().rev() {
            self.delete(&info.session_id).await?;
            deleted.push(info.session_id.clone());
        }

        info!(deleted = deleted.len(), kept = keep, "session cleanup complete");
        Ok(deleted)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

fn normalize_id(session_id: &str) -> StoreResult<&str> {
    let id = session_id.trim();
    let id = id.strip_prefix(FILE_PREFIX).unwrap_or(id);
    if id.is_empty() {
        return Err(StoreError::InvalidArgument("session id is empty".into()));
    }
    if id.contains(['/', '\\']) || id.contains("..") {
        return Err(StoreError::InvalidArgument(format!(
            "session id `{id}` must not contain path components"
        )));
    }
    Ok(id)
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> StoreResult<()> {
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
