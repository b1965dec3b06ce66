//! Conversation optimizer.
//!
//! Two passes used by the hybrid and adaptive pruning strategies:
//!
//! - [`ConversationOptimizer::optimize`] replaces redundant tool output
//!   (re-reads of unchanged files, repeated shell commands) with one-line
//!   summaries.  Message count, order, roles and pairing ids are preserved.
//! - [`ConversationOptimizer::aggressive`] keeps only the head and the recent
//!   tail of the conversation and truncates large tool output in the middle.
//!
//! Tool names and arguments come from the assistant tool calls, looked up by
//! `tool_call_id`.

use std::collections::{BTreeSet, HashMap};

use ring::digest;
use tracing::debug;

use crate::llm::types::{Message, Role, ToolCall};
use crate::pruning::groups::{expand_to_groups, group_messages, select};

/// Minimum distance between an older identical file read and the latest one
/// before the older copy is collapsed.
const FILE_READ_MIN_GAP: usize = 5;
/// Transient commands older than the latest run by more than this are
/// collapsed regardless of output.
const TRANSIENT_COMMAND_MIN_GAP: usize = 2;
/// Tool results longer than this are truncated by the aggressive pass.
const AGGRESSIVE_CHAR_CAP: usize = 800;
/// The newest messages are never truncated by the aggressive pass.
const AGGRESSIVE_UNTOUCHED_TAIL: usize = 5;
const TRUNCATION_SUFFIX: &str = "... [TRUNCATED for context limit]";

const TRANSIENT_COMMANDS: &[&str] = &[
    "ls", "find", "grep", "tree", "pwd", "whoami", "date", "ps", "df", "du", "which", "whereis",
    "locate", "file", "stat",
];

/// Name of the file-reading tool whose results are deduplicated.
pub const READ_FILE_TOOL: &str = "read_file";
/// Name of the shell tool whose results are deduplicated.
pub const SHELL_COMMAND_TOOL: &str = "shell_command";

fn content_hash(content: &str) -> digest::Digest {
    digest::digest(&digest::SHA256, content.as_bytes())
}

fn is_transient_command(command: &str) -> bool {
    let lower = command.trim().to_lowercase();
    TRANSIENT_COMMANDS
        .iter()
        .any(|p| lower == *p || lower.starts_with(&format!("{p} ")))
}

/// Truncate `text` to at most `cap` characters, respecting char boundaries.
fn truncate_chars(text: &str, cap: usize) -> Option<String> {
    let (cut, _) = text.char_indices().nth(cap)?;
    Some(format!("{}{}", &text[..cut], TRUNCATION_SUFFIX))
}

/// Map every tool call id in `messages` to its call.
pub fn index_tool_calls(messages: &[Message]) -> HashMap<&str, &ToolCall> {
    messages
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .map(|c| (c.id.as_str(), c))
        .collect()
}

/// Resolve the tool call a tool message answers.
pub fn call_for<'a>(
    message: &Message,
    calls: &HashMap<&str, &'a ToolCall>,
) -> Option<&'a ToolCall> {
    if message.role != Role::Tool {
        return None;
    }
    calls.get(message.tool_call_id.as_deref()?).copied()
}

struct ToolOutput {
    index: usize,
    key: String,
    hash: digest::Digest,
}

fn same_hash(a: &digest::Digest, b: &digest::Digest) -> bool {
    a.as_ref() == b.as_ref()
}

/// Stateless optimizer; every call works only on the messages it is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationOptimizer;

impl ConversationOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// Collapse redundant file reads and shell command results.
    pub fn optimize(&self, messages: &[Message]) -> Vec<Message> {
        let calls = index_tool_calls(messages);

        let mut reads: Vec<ToolOutput> = Vec::new();
        let mut commands: Vec<ToolOutput> = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            let Some(call) = call_for(message, &calls) else {
                continue;
            };
            let (bucket, arg) = match call.name.as_str() {
                READ_FILE_TOOL => (&mut reads, "path"),
                SHELL_COMMAND_TOOL => (&mut commands, "command"),
                _ => continue,
            };
            if let Some(key) = call.string_argument(arg) {
                bucket.push(ToolOutput {
                    index,
                    key,
                    hash: content_hash(&message.content),
                });
            }
        }

        let latest = |outputs: &[ToolOutput]| -> HashMap<String, usize> {
            outputs
                .iter()
                .enumerate()
                .map(|(pos, o)| (o.key.clone(), pos))
                .collect()
        };
        let latest_reads = latest(&reads);
        let latest_commands = latest(&commands);

        let mut optimized = messages.to_vec();
        let mut collapsed = 0usize;

        for read in &reads {
            let Some(&pos) = latest_reads.get(&read.key) else {
                continue;
            };
            let newest = &reads[pos];
            if read.index < newest.index
                && newest.index - read.index >= FILE_READ_MIN_GAP
                && same_hash(&read.hash, &newest.hash)
            {
                let original = &messages[read.index].content;
                optimized[read.index].content = format!(
                    "[OPTIMIZED] Previously read {} ({} lines, {} chars) - content unchanged since last read",
                    read.key,
                    original.trim().lines().count(),
                    original.chars().count()
                );
                collapsed += 1;
            }
        }

        for run in &commands {
            let Some(&pos) = latest_commands.get(&run.key) else {
                continue;
            };
            let newest = &commands[pos];
            if run.index >= newest.index {
                continue;
            }
            let transient = is_transient_command(&run.key);
            let stale = transient && newest.index - run.index > TRANSIENT_COMMAND_MIN_GAP;
            if stale || same_hash(&run.hash, &newest.hash) {
                let original = &messages[run.index].content;
                let kind = if transient {
                    "exploration command"
                } else {
                    "command"
                };
                optimized[run.index].content = format!(
                    "[OPTIMIZED] Previously executed {kind} `{}` ({} lines output, {} chars) - superseded by a later run",
                    run.key,
                    original.trim().lines().count(),
                    original.chars().count()
                );
                collapsed += 1;
            }
        }

        if collapsed > 0 {
            debug!(collapsed, total = messages.len(), "optimizer collapsed redundant tool output");
        }
        optimized
    }

    /// Keep the system message, the first user message and the last
    /// `recent` messages (closed over tool groups), then truncate large tool
    /// results outside the newest few.
    pub fn aggressive(&self, messages: &[Message], recent: usize) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let mut keep: BTreeSet<usize> = BTreeSet::new();
        if messages[0].role == Role::System {
            keep.insert(0);
        }
        if let Some(first_user) = messages.iter().position(|m| m.role == Role::User) {
            keep.insert(first_user);
        }
        keep.extend(messages.len().saturating_sub(recent)..messages.len());

        let groups = group_messages(messages);
        let mut kept = select(messages, &expand_to_groups(&keep, &groups));

        let untouched_from = kept.len().saturating_sub(AGGRESSIVE_UNTOUCHED_TAIL);
        let mut truncated = 0usize;
        for message in kept.iter_mut().take(untouched_from) {
            if !message.is_tool_result {
                continue;
            }
            if let Some(short) = truncate_chars(&message.content, AGGRESSIVE_CHAR_CAP) {
                message.content = short;
                truncated += 1;
            }
        }

        debug!(
            before = messages.len(),
            after = kept.len(),
            truncated,
            "aggressive optimization applied"
        );
        kept
    }
}
