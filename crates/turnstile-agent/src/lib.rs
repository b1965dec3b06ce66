//! Turn processing and adaptive context pruning for tool-calling agents.
//!
//! This crate holds the core of a coding agent's conversation loop: it
//! assembles each request, keeps the transcript inside the model's context
//! window, and decides turn by turn whether the model is done, needs its
//! tools run, or should be nudged to continue.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────┐     ┌────────────────┐
//! │   Assembler   │────>│ ModelClient  │────>│ TurnProcessor  │
//! │ (prompt, prune│     │  (external)  │     │ (marker, tools,│
//! │  transient)   │     └──────────────┘     │  validator)    │
//! └───────┬───────┘                          └───────┬────────┘
//!         │                                          │
//!   ┌─────┴──────┐                            ┌──────┴───────┐
//!   │   Pruner   │                            │ ToolExecutor │
//!   │ (5 strats) │                            │  (external)  │
//!   └─────┬──────┘                            └──────────────┘
//!         │
//!   ┌─────┴──────────────┐
//!   │ TokenEstimator     │
//!   │ Importance, Groups │
//!   │ Optimizer          │
//!   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- Message types and the model client trait.
//! - [`tokens`] -- Cached token estimation.
//! - [`provider`] -- Provider classes, threshold table, completion policy.
//! - [`pruning`] -- Strategies, importance scoring, tool groups, optimizer.
//! - [`validator`] -- Replaceable completeness heuristic.
//! - [`turn`] -- The per-response state machine.
//! - [`fallback`] -- Recovery of tool calls written into message content.
//! - [`assembler`] -- Builds each request.
//! - [`runtime`] -- The task loop.
//! - [`state`] -- Persisted session state.
//! - [`context_loader`] -- Parallel file reads for prompt context.
//! - [`config`] -- Configuration loading and environment overrides.
//! - [`error`] -- Agent error types.

pub mod assembler;
pub mod config;
pub mod context_loader;
pub mod conversation;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod provider;
pub mod pruning;
pub mod runtime;
pub mod state;
pub mod tokens;
pub mod tools;
pub mod turn;
pub mod validator;

// Re-export the most commonly used types at the crate root.
pub use assembler::ConversationAssembler;
pub use config::AgentConfig;
pub use context_loader::{ContextLoader, FileContext};
pub use conversation::Conversation;
pub use error::{AgentError, ModelErrorKind, Result};
pub use fallback::{ParsedToolCalls, parse_tool_calls};
pub use llm::{Message, ModelClient, ModelResponse, Role, ToolCall, ToolDefinition, Usage};
pub use provider::{Provider, ProviderClass, PruningThresholds};
pub use pruning::optimizer::ConversationOptimizer;
pub use pruning::{ConversationPruner, PruningStrategy, is_well_paired};
pub use runtime::{AgentResponse, AgentRuntime, AgentSession};
pub use state::{ConversationState, TaskAction};
pub use tokens::TokenEstimator;
pub use tools::{ToolAdapter, ToolExecutor, ToolRegistry};
pub use turn::{
    BLANK_RESPONSE_REMINDER, CONTINUATION_PROMPT, DEFAULT_COMPLETION_MARKER, REPETITION_REMINDER,
    STALLED_MESSAGE, TurnEvaluation, TurnOutcome, TurnProcessor, TurnState, sanitize_content,
};
pub use validator::{CompletenessCheck, HeuristicValidator};
