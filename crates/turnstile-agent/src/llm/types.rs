//! Core types for model interaction.
//!
//! These types model the data flowing between the conversation engine and a
//! model provider.  They are provider-agnostic; translating them into a wire
//! format is the job of a [`super::ModelClient`] implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user (and injected guidance).
    User,
    /// Output from the model.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

impl Role {
    /// Lowercase name as used on the wire and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content of the message.
    ///
    /// For [`Role::Tool`] messages this contains the tool output.  For
    /// assistant messages that only carry tool calls this may be empty.
    #[serde(default)]
    pub content: String,

    /// Reasoning text returned alongside the answer by reasoning models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Identifies which tool call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set when the message carries the output of a tool.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_tool_result: bool,

    /// Set when the message reports an error.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn mentions_error(content: &str) -> bool {
    content.to_lowercase().contains("error")
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            reasoning_content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_tool_result: false,
            is_error: false,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        let is_error = mentions_error(&content);
        Self {
            is_error,
            ..Self::plain(Role::User, content)
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    /// Create an assistant message that carries tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content.into())
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let is_error = mentions_error(&content);
        Self {
            tool_call_id: Some(tool_call_id.into()),
            is_tool_result: true,
            is_error,
            ..Self::plain(Role::Tool, content)
        }
    }

    /// Create a tool result message for a failed invocation.
    pub fn tool_error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::tool_result(tool_call_id, content)
        }
    }

    /// Attach reasoning text.
    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning_content = reasoning.filter(|r| !r.is_empty());
        self
    }

    /// Whether this is an assistant message that requested tools.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// Populate the structured flags from the message's role and content.
    ///
    /// Used once when loading sessions written before the flags existed;
    /// freshly constructed messages already carry them.
    pub fn refresh_signals(&mut self) {
        match self.role {
            Role::Tool => {
                self.is_tool_result = true;
                self.is_error = self.is_error || mentions_error(&self.content);
            }
            Role::User => {
                self.is_error = self.is_error || mentions_error(&self.content);
            }
            Role::System | Role::Assistant => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier used to correlate the result.  Generated when the model
    /// leaves it empty.
    #[serde(default)]
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// Arguments as raw JSON text, exactly as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    /// Create a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments.  An empty string is treated as `{}`.
    pub fn parsed_arguments(&self) -> serde_json::Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }

    /// Look up a string argument, e.g. `path` or `command`.
    pub fn string_argument(&self, key: &str) -> Option<String> {
        self.parsed_arguments()
            .ok()?
            .get(key)?
            .as_str()
            .map(str::to_owned)
    }
}

/// A tool definition exposed to the model so it knows what it may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Model response
// ---------------------------------------------------------------------------

/// One response from the model, as seen by the turn processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    /// Assistant text.
    pub content: String,

    /// Reasoning text, when the provider returns it separately.
    pub reasoning_content: Option<String>,

    /// Tool calls requested in this response, possibly with duplicates.
    pub tool_calls: Vec<ToolCall>,

    /// Provider finish reason (`"stop"`, `"tool_calls"`, `"length"`, ...).
    pub finish_reason: Option<String>,

    /// Token accounting for this call.
    pub usage: Usage,
}

impl ModelResponse {
    /// A plain text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".into()),
            ..Self::default()
        }
    }

    /// A response that requests tools.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: Some("tool_calls".into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Usage tracking
// ---------------------------------------------------------------------------

/// Token usage and cost information returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens generated by the model.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Prompt tokens served from the provider's cache.
    #[serde(default)]
    pub cached_tokens: u64,
    /// Estimated cost of the call in USD.
    #[serde(default)]
    pub estimated_cost: f64,
    /// Cost avoided thanks to cached prompt tokens, in USD.
    #[serde(default)]
    pub cached_cost_savings: f64,
}

impl Usage {
    /// Prompt plus completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_signals() {
        let result = Message::tool_result("call_1", "file contents");
        assert!(result.is_tool_result);
        assert!(!result.is_error);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));

        let failed = Message::tool_result("call_2", "Error: no such file");
        assert!(failed.is_error);

        let user = Message::user("I got a compile ERROR");
        assert!(user.is_error);
        assert!(!user.is_tool_result);

        let assistant = Message::assistant("no error here, honestly");
        assert!(!assistant.is_error);
    }

    #[test]
    fn flags_are_omitted_when_false() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert!(json.get("is_error").is_none());
        assert!(json.get("is_tool_result").is_none());
        assert!(json.get("tool_calls").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn refresh_signals_recovers_legacy_flags() {
        let mut msg: Message = serde_json::from_value(serde_json::json!({
            "role": "tool",
            "content": "permission error",
            "tool_call_id": "c1"
        }))
        .unwrap();
        assert!(!msg.is_tool_result);
        msg.refresh_signals();
        assert!(msg.is_tool_result);
        assert!(msg.is_error);
    }

    #[test]
    fn empty_arguments_parse_as_object() {
        let call = ToolCall::new("c", "list_files", "");
        assert!(call.parsed_arguments().unwrap().is_object());

        let call = ToolCall::new("c", "read_file", r#"{"path":"src/main.rs"}"#);
        assert_eq!(call.string_argument("path").as_deref(), Some("src/main.rs"));
        assert!(call.string_argument("missing").is_none());
    }
}
