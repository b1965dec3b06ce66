//! Persisted conversation state.
//!
//! One [`ConversationState`] is stored per session through
//! [`turnstile_store::SessionStore`].  Field names are part of the session
//! file format.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use turnstile_store::SessionStore;

use crate::error::Result;
use crate::llm::types::{Message, Usage};

/// A completed action recorded for session continuity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub description: String,
    #[serde(default)]
    pub details: String,
}

impl TaskAction {
    pub fn new(
        action_type: impl Into<String>,
        description: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            description: description.into(),
            details: details.into(),
        }
    }
}

/// Everything needed to resume a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub task_actions: Vec<TaskAction>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub cached_cost_savings: f64,
    pub last_updated: DateTime<Utc>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            task_actions: Vec::new(),
            total_cost: 0.0,
            total_tokens: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cached_tokens: 0,
            cached_cost_savings: 0.0,
            last_updated: Utc::now(),
            session_id: session_id.into(),
            name: None,
        }
    }

    /// Start a session with a fresh time-ordered id.
    pub fn new_session() -> Self {
        Self::new(uuid::Uuid::now_v7().simple().to_string())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add one model call's usage to the running totals.
    pub fn record_usage(&mut self, usage: &Usage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens();
        self.cached_tokens += usage.cached_tokens;
        self.total_cost += usage.estimated_cost;
        self.cached_cost_savings += usage.cached_cost_savings;
    }

    pub fn record_action(&mut self, action: TaskAction) {
        self.task_actions.push(action);
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Human-readable recap of the session's actions, for continuity.
    pub fn summary(&self) -> String {
        if self.task_actions.is_empty() {
            return "No previous actions recorded.".to_owned();
        }

        let count = |kind: &str| {
            self.task_actions
                .iter()
                .filter(|a| a.action_type == kind)
                .count()
        };

        let mut out = String::from("Previous session summary:\n");
        let _ = writeln!(out, "- Files created: {}", count("file_created"));
        let _ = writeln!(out, "- Files modified: {}", count("file_modified"));
        let _ = writeln!(out, "- Commands executed: {}", count("command_executed"));
        let _ = writeln!(out, "- Files read: {}", count("file_read"));
        let _ = writeln!(out, "- Total cost: ${:.6}", self.total_cost);
        let _ = writeln!(out, "- Total tokens: {}", self.total_tokens);

        out.push_str("\nRecent actions:\n");
        let start = self.task_actions.len().saturating_sub(5);
        for action in &self.task_actions[start..] {
            let _ = writeln!(out, "- {}: {}", action.action_type, action.description);
        }
        out
    }

    /// Write the state to `store`, stamping `last_updated`.
    pub async fn save(&mut self, store: &SessionStore) -> Result<()> {
        self.touch();
        let path = store.save(&self.session_id, &*self).await?;
        debug!(
            session_id = %self.session_id,
            messages = self.messages.len(),
            path = %path.display(),
            "session saved"
        );
        Ok(())
    }

    /// Load a session, deriving message flags missing from older files.
    pub async fn load(store: &SessionStore, session_id: &str) -> Result<Self> {
        let mut state: Self = store.load(session_id).await?;
        for message in &mut state.messages {
            message.refresh_signals();
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut state = ConversationState::new("s1");
        let usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            cached_tokens: 40,
            estimated_cost: 0.5,
            cached_cost_savings: 0.1,
        };
        state.record_usage(&usage);
        state.record_usage(&usage);
        assert_eq!(state.total_tokens, 240);
        assert_eq!(state.prompt_tokens, 200);
        assert_eq!(state.cached_tokens, 80);
        assert!((state.total_cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn json_field_names() {
        let mut state = ConversationState::new("abc");
        state.record_action(TaskAction::new("file_read", "read main.rs", "src/main.rs"));
        let json = serde_json::to_value(&state).unwrap();
        for field in [
            "messages",
            "task_actions",
            "total_cost",
            "total_tokens",
            "prompt_tokens",
            "completion_tokens",
            "cached_tokens",
            "cached_cost_savings",
            "last_updated",
            "session_id",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["task_actions"][0]["type"], "file_read");
    }

    #[test]
    fn summary_counts_actions() {
        let mut state = ConversationState::new("abc");
        assert_eq!(state.summary(), "No previous actions recorded.");
        state.record_action(TaskAction::new("file_created", "new module", ""));
        state.record_action(TaskAction::new("file_read", "read config", ""));
        state.record_action(TaskAction::new("file_read", "read lib", ""));
        let summary = state.summary();
        assert!(summary.contains("Files created: 1"));
        assert!(summary.contains("Files read: 2"));
        assert!(summary.contains("- file_read: read lib"));
    }
}
