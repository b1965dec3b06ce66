//! Tool-call grouping.
//!
//! A [`ToolGroup`] is an assistant message that requested tools together with
//! the tool results that immediately follow it, or any other single message.
//! Pruning keeps or drops whole groups so a tool call is never separated from
//! its result.

use std::collections::{BTreeSet, HashSet};

use crate::llm::types::{Message, Role};

/// Half-open range `start..end` of message indices forming one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolGroup {
    pub start: usize,
    pub end: usize,
}

impl ToolGroup {
    /// Indices covered by this group.
    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// Number of messages in the group.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Groups always contain at least one message.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `index` falls inside the group.
    pub fn contains(&self, index: usize) -> bool {
        self.indices().contains(&index)
    }
}

/// Partition `messages` into consecutive tool groups.
pub fn group_messages(messages: &[Message]) -> Vec<ToolGroup> {
    let mut groups = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let start = i;
        i += 1;
        if messages[start].has_tool_calls() {
            while i < messages.len() && messages[i].role == Role::Tool {
                i += 1;
            }
        }
        groups.push(ToolGroup { start, end: i });
    }

    groups
}

/// Close `keep` over tool groups: if any member of a group is kept, every
/// member is.
pub fn expand_to_groups(keep: &BTreeSet<usize>, groups: &[ToolGroup]) -> BTreeSet<usize> {
    let mut closed = BTreeSet::new();
    for group in groups {
        if group.indices().any(|i| keep.contains(&i)) {
            closed.extend(group.indices());
        }
    }
    closed
}

/// Collect the messages at `indices` in original order.
pub fn select(messages: &[Message], indices: &BTreeSet<usize>) -> Vec<Message> {
    indices
        .iter()
        .filter_map(|&i| messages.get(i).cloned())
        .collect()
}

/// Drop tool messages whose `tool_call_id` was not issued by an earlier
/// assistant message in the same list.
pub fn remove_orphaned_tool_results(messages: Vec<Message>) -> Vec<Message> {
    let mut issued: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role == Role::Tool {
            let paired = message
                .tool_call_id
                .as_ref()
                .is_some_and(|id| issued.contains(id));
            if !paired {
                tracing::debug!(
                    tool_call_id = ?message.tool_call_id,
                    "dropping orphaned tool result"
                );
                continue;
            }
        }
        for call in &message.tool_calls {
            issued.insert(call.id.clone());
        }
        kept.push(message);
    }

    kept
}

/// Whether every tool message answers an earlier tool call and every tool
/// call has its answer.
pub fn is_well_paired(messages: &[Message]) -> bool {
    let mut issued: HashSet<&str> = HashSet::new();
    let mut answered: HashSet<&str> = HashSet::new();
    for message in messages {
        if message.role == Role::Tool {
            match message.tool_call_id.as_deref() {
                Some(id) if issued.contains(id) => {
                    answered.insert(id);
                }
                _ => return false,
            }
        }
        for call in &message.tool_calls {
            issued.insert(call.id.as_str());
        }
    }
    issued.len() == answered.len()
}
