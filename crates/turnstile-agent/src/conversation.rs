//! Conversation history and the transient message queue.

use tracing::debug;

use crate::llm::types::{Message, Role};

/// The mutable state of one conversation.
///
/// `messages` is the persisted history.  `transient` holds one-shot guidance
/// (continuation nudges, marker reminders) that is appended to the next
/// request only and never stored in history.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// The system prompt currently in effect.
    pub system_prompt: String,
    /// Persisted history, oldest first.
    pub messages: Vec<Message>,
    transient: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            transient: Vec::new(),
        }
    }

    /// Resume from stored history.
    pub fn with_history(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::new(system_prompt)
        }
    }

    /// Append a message to history.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Queue a one-shot message for the next request.  A message with the
    /// same role and content already queued is not added twice.
    pub fn enqueue_transient(&mut self, role: Role, content: impl Into<String>) {
        let content = content.into();
        if self
            .transient
            .iter()
            .any(|m| m.role == role && m.content == content)
        {
            debug!(role = role.as_str(), "transient message already queued");
            return;
        }
        let message = match role {
            Role::System => Message::system(content),
            Role::User => Message::user(content),
            Role::Assistant => Message::assistant(content),
            // A tool message here would have no matching call.
            Role::Tool => Message::user(content),
        };
        self.transient.push(message);
    }

    /// Messages waiting for the next request.
    pub fn transient(&self) -> &[Message] {
        &self.transient
    }

    /// Remove and return every queued transient message.
    pub fn take_transient(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.transient)
    }

    /// The most recent assistant message in history.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// The most recent user message in history.
    pub fn last_user(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}
