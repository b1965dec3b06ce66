//! # turnstile-store
//!
//! Storage for turnstile conversations.
//!
//! Provides one-JSON-file-per-session persistence with newest-N cleanup,
//! and an opt-in JSON Lines turn log.
//!
//! ## Layout
//!
//! ```text
//! ~/.turnstile/sessions/
//! ├── session_<id>.json     (pretty JSON, 0600, written via temp + rename)
//! └── ...
//! $TURNSTILE_TURN_LOG       (one JSON object per line, append-only)
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use turnstile_store::{SessionStore, DEFAULT_SESSIONS_TO_KEEP};
//!
//! let store = SessionStore::open_default()?;
//! store.save("abc", &state).await?;
//! let state: MyState = store.load("abc").await?;
//! store.cleanup(DEFAULT_SESSIONS_TO_KEEP).await?;
//! ```

pub mod error;
pub mod session;
pub mod turn_log;

// ── re-exports ───────────────────────────────────────────────────────

pub use error::{StoreError, StoreResult};
pub use session::{DEFAULT_SESSIONS_TO_KEEP, SessionInfo, SessionStore};
pub use turn_log::{TURN_LOG_ENV, TurnLog};
