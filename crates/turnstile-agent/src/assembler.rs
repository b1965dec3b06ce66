//! Request assembly.
//!
//! [`ConversationAssembler::prepare`] turns a [`Conversation`] into the exact
//! message list sent to the model:
//!
//! ```text
//! [system prompt] + history (pruned if over threshold) + transient queue
//! ```
//!
//! Pruning results are written back into the conversation so the next turn
//! starts from the smaller history.  Transient messages are consumed.

use std::sync::Arc;

use tracing::{debug, info};

use crate::conversation::Conversation;
use crate::llm::types::{Message, Role};
use crate::provider::Provider;
use crate::pruning::{ConversationPruner, PruningStrategy, remove_orphaned_tool_results};
use crate::tokens::TokenEstimator;

/// Placeholder for tool results that produced no output.
pub const EMPTY_TOOL_OUTPUT: &str = "(no output)";

/// Builds per-turn requests for one provider.
#[derive(Debug, Clone)]
pub struct ConversationAssembler {
    provider: Provider,
    max_context_tokens: usize,
    pruner: ConversationPruner,
}

impl ConversationAssembler {
    pub fn new(
        provider: Provider,
        max_context_tokens: usize,
        strategy: PruningStrategy,
        estimator: Arc<TokenEstimator>,
    ) -> Self {
        Self {
            provider,
            max_context_tokens,
            pruner: ConversationPruner::new(strategy, estimator),
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn pruner(&self) -> &ConversationPruner {
        &self.pruner
    }

    /// Build the request for the next model call.
    pub fn prepare(&self, conversation: &mut Conversation) -> Vec<Message> {
        let prompt = conversation.system_prompt.clone();
        let trimmed = prompt.trim();

        let before = conversation.messages.len();
        conversation
            .messages
            .retain(|m| !(m.role == Role::System && m.content.trim() == trimmed));
        if conversation.messages.len() != before {
            debug!(
                removed = before - conversation.messages.len(),
                "dropped duplicate system prompt from history"
            );
        }

        let mut request = Vec::with_capacity(conversation.messages.len() + 1);
        request.push(Message::system(prompt));
        request.extend(conversation.messages.iter().cloned());

        let estimator = self.pruner.estimator();
        let current = estimator.estimate_request(&request);
        if self
            .pruner
            .should_prune(current, self.max_context_tokens, &self.provider)
        {
            let pruned = self
                .pruner
                .prune(&request, current, self.max_context_tokens, &self.provider);
            info!(
                tokens_before = current,
                tokens_after = estimator.estimate_request(&pruned),
                max = self.max_context_tokens,
                messages_before = request.len(),
                messages_after = pruned.len(),
                "history pruned before request"
            );
            conversation.messages = pruned.iter().skip(1).cloned().collect();
            request = pruned;
        }

        let transient = conversation.take_transient();
        if !transient.is_empty() {
            debug!(count = transient.len(), "appending transient messages");
        }
        request.extend(transient);

        self.sanitize(request)
    }

    /// Provider-specific cleanup that keeps tool pairing intact.
    fn sanitize(&self, request: Vec<Message>) -> Vec<Message> {
        let strip_reasoning = self.provider.rejects_reasoning_content();
        remove_orphaned_tool_results(request)
            .into_iter()
            .map(|mut m| {
                if strip_reasoning {
                    m.reasoning_content = None;
                }
                if m.role == Role::Tool && m.content.trim().is_empty() {
                    m.content = EMPTY_TOOL_OUTPUT.to_owned();
                }
                m
            })
            .collect()
    }
}
