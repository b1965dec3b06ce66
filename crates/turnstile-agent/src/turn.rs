//! Turn processing.
//!
//! The [`TurnProcessor`] consumes one model response and decides what happens
//! next.  Content is first stripped of `<think>` blocks and terminal escape
//! sequences.  Then, in order of precedence:
//!
//! 1. the completion marker ends the task,
//! 2. tool calls are deduplicated, executed and answered; calls written into
//!    the content are recovered by [`crate::fallback`] when the response has
//!    no structured ones,
//! 3. `finish_reason` `length` gets a continuation prompt; `content_filter`
//!    and unrecognized reasons continue without one,
//! 4. a blank or repeated answer gets a reminder, and a second one in a row
//!    stops the task with an error,
//! 5. an apparently truncated answer gets a continuation prompt,
//! 6. a plain answer ends the task if the provider allows implicit completion,
//! 7. otherwise the model is reminded to emit the marker.
//!
//! Every processed response appends exactly one assistant message to history.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use turnstile_store::TurnLog;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::fallback;
use crate::llm::types::{Message, ModelResponse, Role, ToolCall, Usage};
use crate::provider::Provider;
use crate::tools::ToolExecutor;
use crate::validator::{CompletenessCheck, HeuristicValidator};

/// Default in-band completion marker.
pub const DEFAULT_COMPLETION_MARKER: &str = "[[TASK_COMPLETE]]";

/// Prompt queued when an answer looks cut off.
pub const CONTINUATION_PROMPT: &str =
    "Please continue with your response. The previous response appears incomplete.";

/// Reminder queued after the first blank response.
pub const BLANK_RESPONSE_REMINDER: &str = "You provided no content. If you are finished, provide a final summary or result. \
     If not finished, continue now with your next concrete action/output.\n\
     - If you intend to use tools, emit valid tool_calls with proper JSON arguments.\n\
     - Otherwise, proceed with the actual result (not a plan).";

/// Reminder queued after the first repeated response.
pub const REPETITION_REMINDER: &str = "You appear to be stuck in a repetitive loop. Please break out of this pattern and either:\n\
     1. If you are finished, provide a final summary or result\n\
     2. If not finished, take a concrete action (use tools) or provide a specific result\n\
     3. Avoid repeating the same phrases and move forward with the actual task.";

/// Reported when the model stalls twice in a row.
pub const STALLED_MESSAGE: &str = "Error: The agent provided two consecutive blank responses and appears to be stuck. \
     Please try rephrasing your request or break it into smaller tasks.";

const CHANNEL_SEPARATOR: &str = "<|channel|>";
const LENGTH_LIMIT_TRIGGER: &str = "model length limit";
const EXCERPT_CHARS: usize = 280;
/// Consecutive blank or repeated responses that stop the task.
const MAX_STALLED_RESPONSES: u32 = 2;

static THINK_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").ok());
static ANSI_CSI: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[mGKHJABCD]").ok());
static ANSI_CHARSET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\([0-9;]*[AB]").ok());

/// Remove `<think>` blocks and terminal escape sequences from model text.
pub fn sanitize_content(content: &str) -> String {
    let mut cleaned = content.to_owned();
    for re in [THINK_BLOCK.as_ref(), ANSI_CSI.as_ref(), ANSI_CHARSET.as_ref()]
        .into_iter()
        .flatten()
    {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned.retain(|c| c != '\x1b');
    if cleaned.len() != content.len() {
        debug!(removed = content.len() - cleaned.len(), "sanitized model content");
    }
    cleaned
}

/// Where the processor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    AwaitingResponse,
    Processing,
    /// The task is over (completed or cancelled).
    Stopped,
    /// Another model call is needed.
    Continuing,
}

/// One log record per processed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnEvaluation {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub user_input: String,
    pub assistant_content: String,
    pub reasoning_snippet: String,
    pub tool_calls: usize,
    pub tool_results: usize,
    pub token_usage: Usage,
    pub finish_reason: Option<String>,
    pub completion_reached: bool,
    pub guardrail_trigger: Option<String>,
}

/// Result of processing one response.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: TurnState,
    pub evaluation: TurnEvaluation,
    /// Cancellation was observed while executing tools.
    pub cancelled: bool,
    /// Text to report in place of the last assistant message.
    pub message: Option<String>,
}

impl TurnOutcome {
    pub fn is_stopped(&self) -> bool {
        self.state == TurnState::Stopped
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}

/// Generate an id for a tool call the model left unnamed.
pub fn generate_tool_call_id() -> String {
    format!("call_{}", Uuid::now_v7().simple())
}

/// Normalize ids and names, then drop duplicate calls.
///
/// A call is a duplicate when its non-empty id was already seen, or when an
/// earlier call had the same name and byte-identical arguments.
pub fn dedupe_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let total = calls.len();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_args: HashSet<(String, String)> = HashSet::new();
    let mut unique = Vec::with_capacity(total);

    for mut call in calls {
        if let Some((name, _)) = call.name.split_once(CHANNEL_SEPARATOR) {
            call.name = name.to_owned();
        }
        if call.id.is_empty() {
            call.id = generate_tool_call_id();
            debug!(tool = %call.name, id = %call.id, "generated missing tool call id");
        }

        let id_seen = !seen_ids.insert(call.id.clone());
        let args_seen = !id_seen && !seen_args.insert((call.name.clone(), call.arguments.clone()));
        if id_seen || args_seen {
            debug!(tool = %call.name, id = %call.id, "skipping duplicate tool call");
            continue;
        }
        unique.push(call);
    }

    if unique.len() != total {
        debug!(kept = unique.len(), total, "deduplicated tool calls");
    }
    unique
}

/// Guardrail trigger for finish reasons that always need another turn.
///
/// `stop`, `tool_calls` and a missing reason fall through to the
/// completion rules.
fn finish_reason_guardrail(finish_reason: Option<&str>) -> Option<String> {
    match finish_reason.map(str::trim) {
        None | Some("") | Some("stop") | Some("tool_calls") => None,
        Some("length") => Some(LENGTH_LIMIT_TRIGGER.to_owned()),
        Some("content_filter") => Some("content filtered".to_owned()),
        Some(other) => {
            warn!(finish_reason = other, "unknown finish reason");
            Some(format!("unknown finish reason: {other}"))
        }
    }
}

/// The reminder for a blank answer, or for one that repeats the previous
/// assistant text.
fn stall_reminder(conversation: &Conversation, content: &str) -> Option<&'static str> {
    let text = content.trim();
    if text.is_empty() {
        return Some(BLANK_RESPONSE_REMINDER);
    }
    let repeated = conversation
        .last_assistant()
        .is_some_and(|m| m.tool_calls.is_empty() && m.content.trim() == text);
    repeated.then_some(REPETITION_REMINDER)
}

/// Applies the turn rules to model responses.
pub struct TurnProcessor {
    provider: Provider,
    marker: String,
    tools: Arc<dyn ToolExecutor>,
    validator: Arc<dyn CompletenessCheck>,
    turn_log: TurnLog,
    state: TurnState,
    stalled: u32,
}

impl std::fmt::Debug for TurnProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnProcessor")
            .field("provider", &self.provider)
            .field("marker", &self.marker)
            .field("state", &self.state)
            .field("stalled", &self.stalled)
            .finish()
    }
}

impl TurnProcessor {
    pub fn new(provider: Provider, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            provider,
            marker: DEFAULT_COMPLETION_MARKER.to_owned(),
            tools,
            validator: Arc::new(HeuristicValidator),
            turn_log: TurnLog::from_env(),
            state: TurnState::AwaitingResponse,
            stalled: 0,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        if !marker.is_empty() {
            self.marker = marker;
        }
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CompletenessCheck>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_turn_log(mut self, turn_log: TurnLog) -> Self {
        self.turn_log = turn_log;
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// The reminder queued when the provider requires the marker.
    pub fn marker_reminder(&self) -> String {
        format!(
            "If the task is complete, reply with a short summary followed by {} on its own line. \
             Otherwise continue with your next concrete action.",
            self.marker
        )
    }

    /// Process one model response against `conversation`.
    pub async fn process(
        &mut self,
        conversation: &mut Conversation,
        response: ModelResponse,
        iteration: u32,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        self.state = TurnState::Processing;

        let ModelResponse {
            content,
            reasoning_content,
            mut tool_calls,
            finish_reason,
            usage,
        } = response;
        let mut content = sanitize_content(&content);

        let mut evaluation = TurnEvaluation {
            iteration,
            timestamp: Utc::now(),
            user_input: conversation
                .last_user()
                .map(|m| excerpt(&m.content))
                .unwrap_or_default(),
            assistant_content: excerpt(&content),
            reasoning_snippet: reasoning_content.as_deref().map(excerpt).unwrap_or_default(),
            tool_calls: tool_calls.len(),
            tool_results: 0,
            token_usage: usage,
            finish_reason: finish_reason.clone(),
            completion_reached: false,
            guardrail_trigger: None,
        };
        let mut cancelled = false;
        let mut message = None;

        let mut recovered = false;
        if tool_calls.is_empty()
            && !content.contains(&self.marker)
            && fallback::contains_tool_call_patterns(&content)
        {
            match fallback::parse_tool_calls(&content) {
                Ok(parsed) => {
                    info!(iteration, recovered = parsed.tool_calls.len(), "using tool calls written in content");
                    content = parsed.cleaned_content;
                    tool_calls = parsed.tool_calls;
                    evaluation.tool_calls = tool_calls.len();
                    recovered = true;
                }
                Err(e) => debug!(iteration, error = %e, "content mentions tool calls but none parsed"),
            }
        }

        let state = if content.contains(&self.marker) {
            if !tool_calls.is_empty() {
                warn!(
                    dropped = tool_calls.len(),
                    "completion marker present, discarding tool calls"
                );
            }
            let stripped = content.replace(&self.marker, "").trim().to_owned();
            conversation.push(Message::assistant(stripped).with_reasoning(reasoning_content));
            evaluation.completion_reached = true;
            evaluation.guardrail_trigger = Some("completion marker".into());
            info!(iteration, "completion marker received");
            TurnState::Stopped
        } else if !tool_calls.is_empty() {
            self.stalled = 0;
            let (results, was_cancelled) = self
                .handle_tool_calls(conversation, content, reasoning_content, tool_calls, cancel)
                .await;
            evaluation.tool_results = results;
            cancelled = was_cancelled;
            if cancelled {
                evaluation.guardrail_trigger = Some("cancelled".into());
                TurnState::Stopped
            } else {
                if recovered {
                    evaluation.guardrail_trigger = Some("fallback parser success".into());
                }
                TurnState::Continuing
            }
        } else if let Some(trigger) = finish_reason_guardrail(finish_reason.as_deref()) {
            conversation.push(Message::assistant(content).with_reasoning(reasoning_content));
            if trigger == LENGTH_LIMIT_TRIGGER {
                conversation.enqueue_transient(Role::User, CONTINUATION_PROMPT);
            }
            debug!(iteration, trigger = %trigger, "finish reason requires another turn");
            evaluation.guardrail_trigger = Some(trigger);
            TurnState::Continuing
        } else if let Some(reminder) = stall_reminder(conversation, &content) {
            conversation.push(Message::assistant(content).with_reasoning(reasoning_content));
            self.stalled += 1;
            if self.stalled >= MAX_STALLED_RESPONSES {
                warn!(iteration, stalled = self.stalled, "model stalled, stopping");
                evaluation.guardrail_trigger = Some("stalled responses".into());
                message = Some(STALLED_MESSAGE.to_owned());
                TurnState::Stopped
            } else {
                debug!(iteration, "blank or repeated response, reminder queued");
                conversation.enqueue_transient(Role::User, reminder);
                evaluation.guardrail_trigger = Some("blank iteration reminder".into());
                TurnState::Continuing
            }
        } else if self.validator.is_incomplete(&content) {
            self.stalled = 0;
            conversation.push(Message::assistant(content).with_reasoning(reasoning_content));
            conversation.enqueue_transient(Role::User, CONTINUATION_PROMPT);
            evaluation.guardrail_trigger = Some("incomplete response".into());
            debug!(iteration, "response looks incomplete, asking to continue");
            TurnState::Continuing
        } else if self.provider.allows_implicit_completion() {
            self.stalled = 0;
            conversation.push(Message::assistant(content).with_reasoning(reasoning_content));
            evaluation.completion_reached = true;
            evaluation.guardrail_trigger = Some("implicit completion".into());
            info!(iteration, provider = %self.provider.name, "implicit completion accepted");
            TurnState::Stopped
        } else {
            self.stalled = 0;
            conversation.push(Message::assistant(content).with_reasoning(reasoning_content));
            conversation.enqueue_transient(Role::User, self.marker_reminder());
            evaluation.guardrail_trigger = Some("completion marker reminder".into());
            debug!(iteration, "no marker, reminder queued");
            TurnState::Continuing
        };

        if let Err(e) = self.turn_log.append(&evaluation).await {
            warn!(error = %e, "failed to write turn log");
        }

        self.state = state;
        TurnOutcome {
            state,
            evaluation,
            cancelled,
            message,
        }
    }

    /// Returns the number of tool results stored and whether cancellation
    /// interrupted execution.
    async fn handle_tool_calls(
        &self,
        conversation: &mut Conversation,
        content: String,
        reasoning: Option<String>,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> (usize, bool) {
        let unique = dedupe_tool_calls(calls);

        let mut valid: Vec<(ToolCall, Value)> = Vec::with_capacity(unique.len());
        for call in unique {
            match call.parsed_arguments() {
                Ok(args) => valid.push((call, args)),
                Err(e) => {
                    debug!(tool = %call.name, error = %e, "skipping tool call with malformed arguments");
                }
            }
        }

        if valid.is_empty() {
            conversation.push(Message::assistant(content).with_reasoning(reasoning));
            conversation.enqueue_transient(
                Role::User,
                "None of your tool calls could be executed because their arguments were not \
                 valid JSON. Retry with well-formed tool_calls.",
            );
            warn!("every tool call in the response was malformed");
            return (0, false);
        }

        let mut executed = Vec::with_capacity(valid.len());
        let mut results = Vec::with_capacity(valid.len());
        let mut cancelled = false;

        for (call, args) in valid {
            if cancel.is_cancelled() {
                cancelled = true;
                info!(
                    executed = results.len(),
                    "cancellation requested, not issuing further tool calls"
                );
                break;
            }

            debug!(tool = %call.name, id = %call.id, "executing tool");
            let message = match self.tools.execute(&call.name, args).await {
                Ok(output) => Message::tool_result(&call.id, output),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool execution failed");
                    Message::tool_error(&call.id, format!("Error: {e}"))
                }
            };
            results.push(message);
            executed.push(call);
        }

        let count = results.len();
        conversation
            .push(Message::assistant_tool_calls(content, executed).with_reasoning(reasoning));
        for message in results {
            conversation.push(message);
        }
        (count, cancelled)
    }
}
