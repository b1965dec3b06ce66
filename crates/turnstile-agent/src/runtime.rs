//! Conversation runtime loop.
//!
//! Drives turns until the task stops: the assembler builds each request, the
//! model answers, and the turn processor decides whether another turn is
//! needed.  The loop ends on completion, the iteration limit, a model error,
//! or cancellation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use turnstile_store::{SessionStore, TurnLog};
use uuid::Uuid;

use crate::assembler::ConversationAssembler;
use crate::config::AgentConfig;
use crate::conversation::Conversation;
use crate::error::{AgentError, ModelErrorKind, Result};
use crate::llm::ModelClient;
use crate::llm::types::{Message, Role};
use crate::state::ConversationState;
use crate::tokens::TokenEstimator;
use crate::tools::ToolExecutor;
use crate::turn::TurnProcessor;
use crate::validator::{CompletenessCheck, HeuristicValidator};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live conversation plus its persisted counters.
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub conversation: Conversation,
    pub state: ConversationState,
}

impl AgentSession {
    /// Start a new session with a fresh id.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            conversation: Conversation::new(system_prompt),
            state: ConversationState::new_session(),
        }
    }

    /// Resume from a stored state.
    pub fn resume(system_prompt: impl Into<String>, state: ConversationState) -> Self {
        Self {
            conversation: Conversation::with_history(system_prompt, state.messages.clone()),
            state,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Copy the live history into the persisted state.
    pub fn sync_state(&mut self) {
        self.state.messages = self.conversation.messages.clone();
    }
}

// ---------------------------------------------------------------------------
// Agent response
// ---------------------------------------------------------------------------

/// The final response from a task run.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// The last assistant text.
    pub text: String,

    /// Number of model calls that were made.
    pub turns_used: u32,

    /// Whether the task reached completion (marker or implicit).
    pub completed: bool,

    /// The task ID for this run.
    pub task_id: Uuid,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Wires the assembler, a model client and the turn processor together.
pub struct AgentRuntime {
    config: AgentConfig,
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolExecutor>,
    validator: Arc<dyn CompletenessCheck>,
    assembler: ConversationAssembler,
    store: Option<SessionStore>,
    turn_log: TurnLog,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("config", &self.config)
            .field("assembler", &self.assembler)
            .field("store", &self.store)
            .field("turn_log", &self.turn_log)
            .finish()
    }
}

impl AgentRuntime {
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        let estimator = Arc::new(TokenEstimator::new(config.token_cache_bytes));
        let assembler = ConversationAssembler::new(
            config.provider(),
            config.max_context_tokens,
            config.strategy,
            estimator,
        );
        Self {
            config,
            model,
            tools,
            validator: Arc::new(HeuristicValidator),
            assembler,
            store: None,
            turn_log: TurnLog::from_env(),
        }
    }

    /// Persist the session after every turn.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_turn_log(mut self, turn_log: TurnLog) -> Self {
        self.turn_log = turn_log;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CompletenessCheck>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn assembler(&self) -> &ConversationAssembler {
        &self.assembler
    }

    /// A session using the configured system prompt.
    pub fn new_session(&self) -> AgentSession {
        AgentSession::new(self.config.system_prompt.clone())
    }

    fn turn_processor(&self) -> TurnProcessor {
        TurnProcessor::new(self.config.provider(), Arc::clone(&self.tools))
            .with_marker(self.config.completion_marker.clone())
            .with_validator(Arc::clone(&self.validator))
            .with_turn_log(self.turn_log.clone())
    }

    async fn persist(&self, session: &mut AgentSession) {
        session.sync_state();
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = session.state.save(store).await {
            tracing::warn!(session_id = %session.session_id(), error = %e, "failed to save session");
        }
    }

    /// Run `query` to completion.
    ///
    /// # Errors
    ///
    /// Model errors are returned as-is (see [`ModelErrorKind`] for a
    /// user-facing category).  Cancellation returns
    /// [`AgentError::Cancelled`] after the history written so far is saved.
    pub async fn run_task(
        &self,
        session: &mut AgentSession,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let task_id = Uuid::now_v7();
        let max_iterations = self.config.max_iterations;
        let mut processor = self.turn_processor();

        tracing::info!(
            task_id = %task_id,
            session_id = %session.session_id(),
            provider = %self.config.provider(),
            max_iterations,
            "starting task"
        );

        session.conversation.push(Message::user(query));

        for iteration in 0..max_iterations {
            if cancel.is_cancelled() {
                self.persist(session).await;
                return Err(AgentError::Cancelled { task_id });
            }

            let request = self.assembler.prepare(&mut session.conversation);
            tracing::debug!(iteration, messages = request.len(), "sending request");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(task_id = %task_id, iteration, "cancelled while waiting for the model");
                    self.persist(session).await;
                    return Err(AgentError::Cancelled { task_id });
                }
                result = self.model.send(&request) => result,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let kind = ModelErrorKind::classify(&e);
                    tracing::warn!(task_id = %task_id, iteration, ?kind, error = %e, "model call failed");
                    self.persist(session).await;
                    return Err(e);
                }
            };

            let outcome = processor
                .process(&mut session.conversation, response, iteration, cancel)
                .await;
            session.state.record_usage(&outcome.evaluation.token_usage);
            self.persist(session).await;

            if outcome.cancelled {
                return Err(AgentError::Cancelled { task_id });
            }
            if outcome.is_stopped() {
                let text = outcome.message.clone().unwrap_or_else(|| {
                    session
                        .conversation
                        .last_assistant()
                        .map(|m| m.content.clone())
                        .unwrap_or_default()
                });
                tracing::info!(
                    task_id = %task_id,
                    turns = iteration + 1,
                    "task completed"
                );
                return Ok(AgentResponse {
                    text,
                    turns_used: iteration + 1,
                    completed: outcome.evaluation.completion_reached,
                    task_id,
                });
            }
        }

        tracing::warn!(task_id = %task_id, max_iterations, "iteration limit reached");
        let text = session
            .conversation
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(AgentResponse {
            text,
            turns_used: max_iterations,
            completed: false,
            task_id,
        })
    }
}
