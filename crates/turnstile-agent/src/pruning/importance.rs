//! Importance scoring for pruning candidates.

use crate::llm::types::{Message, Role};
use crate::pruning::groups::ToolGroup;
use crate::tokens::TokenEstimator;

const INTENT_PHRASES: &[&str] = &["I'll", "Let me"];

/// Scoring result for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageImportance {
    pub index: usize,
    pub role: Role,
    pub is_user_query: bool,
    pub is_tool_result: bool,
    pub is_error: bool,
    pub token_estimate: usize,
    /// Distance from the end: the newest message has age 1.
    pub age: usize,
    pub score: f64,
}

/// Score one message.
///
/// `first_user_index` is the position of the first user message in the
/// conversation, if any.
pub fn score(message: &Message, index: usize, age: usize, first_user_index: Option<usize>) -> f64 {
    let mut importance = match message.role {
        Role::System => 1.0,
        Role::User if Some(index) == first_user_index => 0.9,
        Role::User => 0.6,
        Role::Assistant | Role::Tool => 0.5,
    };

    if message.is_tool_result {
        importance = if age < 5 { 0.7 } else { 0.3 };
    }
    if message.is_error {
        importance = 0.8;
    }
    if message.role == Role::Assistant
        && (!message.tool_calls.is_empty()
            || INTENT_PHRASES.iter().any(|p| message.content.contains(p)))
    {
        importance += 0.1;
    }
    if age < 5 {
        importance += 0.3 * (5.0 - age as f64) / 5.0;
    }

    importance.min(1.0)
}

/// Score every message in `messages`.
pub fn score_messages(messages: &[Message], estimator: &TokenEstimator) -> Vec<MessageImportance> {
    let first_user_index = messages.iter().position(|m| m.role == Role::User);
    let len = messages.len();

    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let age = len - index;
            MessageImportance {
                index,
                role: message.role,
                is_user_query: Some(index) == first_user_index,
                is_tool_result: message.is_tool_result,
                is_error: message.is_error,
                token_estimate: estimator.estimate_message(message),
                age,
                score: score(message, index, age, first_user_index),
            }
        })
        .collect()
}

/// Aggregate score of a tool group: the highest member score and the sum of
/// member tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupImportance {
    pub group: ToolGroup,
    pub score: f64,
    pub tokens: usize,
}

/// Score each group from its members' message scores.
pub fn score_groups(groups: &[ToolGroup], scores: &[MessageImportance]) -> Vec<GroupImportance> {
    groups
        .iter()
        .map(|group| {
            let members = &scores[group.start..group.end];
            GroupImportance {
                group: *group,
                score: members.iter().map(|m| m.score).fold(0.0, f64::max),
                tokens: members.iter().map(|m| m.token_estimate).sum(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolCall;
    use crate::pruning::groups::group_messages;

    #[test]
    fn base_scores_without_recency() {
        let first_user = Some(1);
        assert_eq!(score(&Message::system("s"), 0, 20, first_user), 1.0);
        assert_eq!(score(&Message::user("q"), 1, 19, first_user), 0.9);
        assert_eq!(score(&Message::user("more"), 3, 17, first_user), 0.6);
        assert_eq!(score(&Message::assistant("ok"), 4, 16, first_user), 0.5);
    }

    #[test]
    fn modifiers() {
        let first_user = Some(1);
        let old_result = Message::tool_result("c", "output");
        assert_eq!(score(&old_result, 5, 10, first_user), 0.3);

        let failing = Message::tool_result("c", "compile error");
        assert_eq!(score(&failing, 5, 10, first_user), 0.8);

        let intent = Message::assistant("Let me check that file");
        assert!((score(&intent, 5, 10, first_user) - 0.6).abs() < 1e-9);

        let with_calls =
            Message::assistant_tool_calls("", vec![ToolCall::new("c", "read_file", "{}")]);
        assert!((score(&with_calls, 5, 10, first_user) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn recency_bonus_and_cap() {
        let first_user = Some(1);
        let recent = Message::tool_result("c", "output");
        // 0.7 + 0.3 * 4/5
        assert!((score(&recent, 9, 1, first_user) - 0.94).abs() < 1e-9);
        assert_eq!(score(&Message::system("s"), 0, 1, first_user), 1.0);
    }

    #[test]
    fn group_score_is_member_max() {
        let messages = vec![
            Message::system("s"),
            Message::user("q"),
            Message::assistant_tool_calls("", vec![ToolCall::new("c", "shell", "{}")]),
            Message::tool_result("c", "fatal error"),
            Message::assistant("a"),
            Message::user("b"),
            Message::assistant("c"),
            Message::user("d"),
            Message::assistant("e"),
        ];
        let estimator = TokenEstimator::default();
        let scores = score_messages(&messages, &estimator);
        let groups = group_messages(&messages);
        let grouped = score_groups(&groups, &scores);

        let tool_group = grouped.iter().find(|g| g.group.start == 2).unwrap();
        assert_eq!(tool_group.group.len(), 2);
        assert_eq!(tool_group.score, 0.8);
        assert_eq!(
            tool_group.tokens,
            scores[2].token_estimate + scores[3].token_estimate
        );
    }
}
