//! Context pruning.
//!
//! When an assembled request threatens to exceed the model's context window
//! the [`ConversationPruner`] removes older messages.  Five strategies are
//! available; every one of them:
//!
//! - keeps the system message first,
//! - never separates a tool call from its result,
//! - never returns fewer than `min_messages` messages when the input had at
//!   least that many (the safety floor).
//!
//! Pruning only removes messages.  It never reorders or inserts.

pub mod groups;
pub mod importance;
pub mod optimizer;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AgentError;
use crate::llm::types::{Message, Role};
use crate::provider::{Provider, ProviderClass, PruningThresholds};
use crate::tokens::TokenEstimator;

use self::groups::{ToolGroup, expand_to_groups, group_messages, select};
use self::importance::{score_groups, score_messages};
use self::optimizer::{ConversationOptimizer, READ_FILE_TOOL, call_for, index_tool_calls};

pub use self::groups::{is_well_paired, remove_orphaned_tool_results};
pub use self::importance::MessageImportance;

/// Number of trailing groups always kept by group-aware importance pruning.
const RECENT_GROUPS: usize = 5;
/// Adaptive: conversations longer than this count as long.
const LONG_HISTORY_MESSAGES: usize = 50;
/// Adaptive: more tool calls than this count as tool-heavy.
const MANY_TOOL_CALLS: usize = 20;
/// Adaptive: a file read larger than this (in chars) triggers deduplication.
const LARGE_FILE_READ_CHARS: usize = 5_000;
/// Adaptive: after deduplication, fall back to the sliding window at this
/// share of the context window.
const DEDUP_FALLBACK_PERCENT: f64 = 0.80;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Pruning algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningStrategy {
    /// Never prune.
    None,
    /// Keep the system message and the most recent messages.
    SlidingWindow,
    /// Keep anchors plus the highest-scoring messages under a token budget.
    Importance,
    /// Deduplicate tool output, then importance.
    Hybrid,
    /// Choose one of the above from the conversation's shape.
    #[default]
    Adaptive,
}

impl PruningStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SlidingWindow => "sliding_window",
            Self::Importance => "importance",
            Self::Hybrid => "hybrid",
            Self::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for PruningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruningStrategy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "sliding_window" => Ok(Self::SlidingWindow),
            "importance" => Ok(Self::Importance),
            "hybrid" => Ok(Self::Hybrid),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(AgentError::ConfigError {
                reason: format!("unknown pruning strategy '{other}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Pruner
// ---------------------------------------------------------------------------

/// Decides when to prune and applies the selected strategy.
#[derive(Debug, Clone)]
pub struct ConversationPruner {
    strategy: PruningStrategy,
    estimator: Arc<TokenEstimator>,
    optimizer: ConversationOptimizer,
}

impl ConversationPruner {
    pub fn new(strategy: PruningStrategy, estimator: Arc<TokenEstimator>) -> Self {
        Self {
            strategy,
            estimator,
            optimizer: ConversationOptimizer::new(),
        }
    }

    pub fn strategy(&self) -> PruningStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: PruningStrategy) {
        self.strategy = strategy;
    }

    pub fn estimator(&self) -> &Arc<TokenEstimator> {
        &self.estimator
    }

    /// Whether a request of `current` tokens against a window of `max`
    /// tokens should be pruned for `provider`.
    pub fn should_prune(&self, current: usize, max: usize, provider: &Provider) -> bool {
        if self.strategy == PruningStrategy::None || max == 0 {
            return false;
        }

        let class = provider.class();
        let t = PruningThresholds::for_class(class);
        let usage = current as f64 / max as f64;

        let prune = match class {
            ProviderClass::HighContext => usage >= t.standard_percent,
            ProviderClass::Default => {
                t.standard_tokens.is_some_and(|ceiling| current >= ceiling)
                    || usage >= t.standard_percent
            }
            ProviderClass::CachedDiscount => {
                let remaining = max as i64 - current as i64;
                let headroom = t
                    .remaining_tokens_limit
                    .min((t.remaining_percent_limit * max as f64) as usize);
                remaining <= headroom as i64
            }
        };

        if prune {
            debug!(
                provider = %provider.name,
                ?class,
                current,
                max,
                usage_pct = usage * 100.0,
                "pruning threshold reached"
            );
        }
        prune
    }

    /// Apply the configured strategy to `messages`.
    ///
    /// `messages[0]` is expected to be the system message.  Callers usually
    /// check [`Self::should_prune`] first.
    pub fn prune(
        &self,
        messages: &[Message],
        current: usize,
        max: usize,
        provider: &Provider,
    ) -> Vec<Message> {
        let t = provider.thresholds();

        let pruned = match self.strategy {
            PruningStrategy::None => messages.to_vec(),
            PruningStrategy::SlidingWindow => self.sliding_window(messages, &t),
            PruningStrategy::Importance => self.by_importance(messages, provider, &t),
            PruningStrategy::Hybrid => self.hybrid(messages, provider, &t),
            PruningStrategy::Adaptive => self.adaptive(messages, current, max, provider, &t),
        };

        let pruned = self.enforce_floor(messages, pruned, &t);

        info!(
            strategy = %self.strategy,
            provider = %provider.name,
            before = messages.len(),
            after = pruned.len(),
            tokens_before = self.estimator.estimate_messages(messages),
            tokens_after = self.estimator.estimate_messages(&pruned),
            "conversation pruned"
        );
        pruned
    }

    // -- strategies ----------------------------------------------------------

    /// System message plus the last `sliding_window - 1` messages; tool
    /// results whose call fell outside the window go with it.
    pub fn sliding_window(&self, messages: &[Message], t: &PruningThresholds) -> Vec<Message> {
        if messages.len() <= t.sliding_window {
            return messages.to_vec();
        }

        let mut start = messages.len() - t.sliding_window.saturating_sub(1);
        while start < messages.len() && messages[start].role == Role::Tool {
            start += 1;
        }

        let mut pruned = Vec::with_capacity(t.sliding_window);
        pruned.push(messages[0].clone());
        pruned.extend_from_slice(&messages[start.max(1)..]);
        pruned
    }

    /// Keep anchors and the recent tail, then add the highest-scoring
    /// remaining messages while they fit the budget.
    pub fn by_importance(
        &self,
        messages: &[Message],
        provider: &Provider,
        t: &PruningThresholds,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }
        if provider.requires_strict_tool_pairing() {
            return self.by_group_importance(messages, t);
        }

        let scores = score_messages(messages, &self.estimator);
        let groups = group_messages(messages);
        let target = t.importance_target(messages.len());

        let mut keep: BTreeSet<usize> = BTreeSet::new();
        keep.insert(0);
        keep.extend(messages.len().saturating_sub(t.recent_messages).max(1)..messages.len());
        if let Some(first_user) = messages.iter().position(|m| m.role == Role::User) {
            keep.insert(first_user);
            if let Some(offset) = messages[first_user..]
                .iter()
                .position(|m| m.role == Role::Assistant)
            {
                keep.insert(first_user + offset);
            }
        }
        let mut keep = expand_to_groups(&keep, &groups);
        let mut running: usize = keep.iter().map(|&i| scores[i].token_estimate).sum();

        let mut candidates: Vec<_> = scores.iter().filter(|s| !keep.contains(&s.index)).collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));

        for candidate in candidates {
            if keep.contains(&candidate.index) {
                continue;
            }
            let Some(group) = groups.iter().find(|g| g.contains(candidate.index)) else {
                continue;
            };
            let cost: usize = group
                .indices()
                .filter(|i| !keep.contains(i))
                .map(|i| scores[i].token_estimate)
                .sum();
            if running + cost < target {
                keep.extend(group.indices());
                running += cost;
            }
        }

        debug!(kept = keep.len(), budget = target, used = running, "importance selection");
        select(messages, &keep)
    }

    /// Importance pruning over whole tool groups.
    fn by_group_importance(&self, messages: &[Message], t: &PruningThresholds) -> Vec<Message> {
        let scores = score_messages(messages, &self.estimator);
        let groups = group_messages(messages);
        let grouped = score_groups(&groups, &scores);
        let target = t.importance_target(messages.len());

        let mut keep_groups: BTreeSet<usize> = BTreeSet::new();
        let has_system = messages[0].role == Role::System;
        if has_system {
            keep_groups.insert(0);
        }
        let first = usize::from(has_system && groups.len() > 1);
        keep_groups.insert(first);
        keep_groups.extend(groups.len().saturating_sub(RECENT_GROUPS)..groups.len());

        let mut running: usize = keep_groups.iter().map(|&g| grouped[g].tokens).sum();

        let mut candidates: Vec<usize> = (0..groups.len())
            .filter(|g| !keep_groups.contains(g))
            .collect();
        candidates.sort_by(|&a, &b| grouped[b].score.total_cmp(&grouped[a].score).then(a.cmp(&b)));

        for g in candidates {
            if running + grouped[g].tokens < target {
                keep_groups.insert(g);
                running += grouped[g].tokens;
            }
        }

        debug!(
            groups = groups.len(),
            kept_groups = keep_groups.len(),
            budget = target,
            used = running,
            "group importance selection"
        );
        flatten(messages, &groups, &keep_groups)
    }

    fn hybrid(&self, messages: &[Message], provider: &Provider, t: &PruningThresholds) -> Vec<Message> {
        let optimized = self.optimizer.optimize(messages);
        self.by_importance(&optimized, provider, t)
    }

    fn adaptive(
        &self,
        messages: &[Message],
        current: usize,
        max: usize,
        provider: &Provider,
        t: &PruningThresholds,
    ) -> Vec<Message> {
        let usage = if max == 0 {
            0.0
        } else {
            current as f64 / max as f64
        };

        if usage > t.aggressive_percent {
            debug!(usage, "adaptive: critical usage, aggressive optimization");
            return self.optimizer.aggressive(messages, t.recent_messages);
        }

        let tool_calls: usize = messages.iter().map(|m| m.tool_calls.len()).sum();
        if messages.len() > LONG_HISTORY_MESSAGES && tool_calls > MANY_TOOL_CALLS {
            debug!(messages = messages.len(), tool_calls, "adaptive: long tool-heavy history, hybrid");
            return self.hybrid(messages, provider, t);
        }

        if has_large_file_reads(messages) {
            let optimized = self.optimizer.optimize(messages);
            let tokens = self.estimator.estimate_messages(&optimized);
            let limit = (max as f64 * DEDUP_FALLBACK_PERCENT) as usize;
            debug!(tokens, limit, "adaptive: large file reads, deduplicated");
            if tokens < limit {
                return optimized;
            }
            return self.sliding_window(&optimized, t);
        }

        debug!("adaptive: importance");
        self.by_importance(messages, provider, t)
    }

    /// Fall back to head plus recent tail when a strategy returned too few
    /// messages.
    fn enforce_floor(
        &self,
        input: &[Message],
        pruned: Vec<Message>,
        t: &PruningThresholds,
    ) -> Vec<Message> {
        if pruned.len() >= t.min_messages || input.len() < t.min_messages {
            return pruned;
        }

        let mut keep: BTreeSet<usize> = (0..t.min_messages).collect();
        keep.extend(input.len().saturating_sub(t.recent_messages)..input.len());
        let keep = expand_to_groups(&keep, &group_messages(input));

        debug!(
            returned = pruned.len(),
            floor = t.min_messages,
            restored = keep.len(),
            "pruning fell below the minimum, applying safety floor"
        );
        select(input, &keep)
    }
}

fn flatten(messages: &[Message], groups: &[ToolGroup], keep: &BTreeSet<usize>) -> Vec<Message> {
    keep.iter()
        .filter_map(|&g| groups.get(g))
        .flat_map(|group| messages[group.start..group.end].iter().cloned())
        .collect()
}

fn has_large_file_reads(messages: &[Message]) -> bool {
    let calls = index_tool_calls(messages);
    messages.iter().any(|m| {
        call_for(m, &calls).is_some_and(|c| c.name == READ_FILE_TOOL)
            && m.content.chars().count() > LARGE_FILE_READ_CHARS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolCall;

    fn pruner(strategy: PruningStrategy) -> ConversationPruner {
        ConversationPruner::new(strategy, Arc::new(TokenEstimator::default()))
    }

    fn plain_conversation(others: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("sys")];
        for i in 0..others {
            if i % 2 == 0 {
                messages.push(Message::user(format!("question {i}")));
            } else {
                messages.push(Message::assistant(format!("answer {i}.")));
            }
        }
        messages
    }

    fn tool_conversation(rounds: usize, payload: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("sys"), Message::user("do the task")];
        for i in 0..rounds {
            let id = format!("call_{i}");
            messages.push(Message::assistant_tool_calls(
                "Let me look.",
                vec![ToolCall::new(&id, "shell", format!(r#"{{"n":{i}}}"#))],
            ));
            messages.push(Message::tool_result(&id, "word ".repeat(payload)));
        }
        messages
    }

    /// `rounds` reads of the same unchanged file, each `payload` long.
    fn file_read_conversation(rounds: usize, payload: &str) -> Vec<Message> {
        let mut messages = vec![Message::system("sys"), Message::user("review lib.rs")];
        for i in 0..rounds {
            let id = format!("read_{i}");
            messages.push(Message::assistant_tool_calls(
                "Reading again.",
                vec![ToolCall::new(&id, READ_FILE_TOOL, r#"{"path":"src/lib.rs"}"#)],
            ));
            messages.push(Message::tool_result(&id, payload));
        }
        messages
    }

    fn optimized_count(messages: &[Message]) -> usize {
        messages
            .iter()
            .filter(|m| m.content.starts_with("[OPTIMIZED]"))
            .count()
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!("sliding-window".parse::<PruningStrategy>().unwrap(), PruningStrategy::SlidingWindow);
        assert_eq!("Adaptive".parse::<PruningStrategy>().unwrap(), PruningStrategy::Adaptive);
        assert!("fancy".parse::<PruningStrategy>().is_err());
        assert_eq!(PruningStrategy::default(), PruningStrategy::Adaptive);
    }

    #[test]
    fn should_prune_by_class() {
        let p = pruner(PruningStrategy::Adaptive);

        let anthropic = Provider::named("anthropic");
        assert!(!p.should_prune(84_000, 100_000, &anthropic));
        assert!(p.should_prune(85_000, 100_000, &anthropic));
        assert!(!p.should_prune(90_000, 200_000, &anthropic));

        let local = Provider::named("lmstudio");
        assert!(p.should_prune(85_000, 1_000_000, &local));
        assert!(p.should_prune(8_500, 10_000, &local));
        assert!(!p.should_prune(8_000, 10_000, &local));

        let openai = Provider::named("openai");
        assert!(!p.should_prune(100_000, 128_000, &openai));
        assert!(p.should_prune(108_000, 128_000, &openai));
        // 20% of 50k is 10k, below the 20k cap
        assert!(!p.should_prune(39_000, 50_000, &openai));
        assert!(p.should_prune(40_000, 50_000, &openai));
    }

    #[test]
    fn none_and_zero_max_never_prune() {
        let none = pruner(PruningStrategy::None);
        assert!(!none.should_prune(1_000_000, 10, &Provider::named("lmstudio")));
        let p = pruner(PruningStrategy::Importance);
        assert!(!p.should_prune(1_000_000, 0, &Provider::named("lmstudio")));

        let messages = plain_conversation(30);
        assert_eq!(none.prune(&messages, 1, 1, &Provider::named("x")), messages);
    }

    #[test]
    fn sliding_window_exact_count() {
        let messages = plain_conversation(24);
        let p = pruner(PruningStrategy::SlidingWindow);
        let out = p.prune(&messages, 90_000, 100_000, &Provider::named("lmstudio"));
        assert_eq!(out.len(), 20);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1], messages[6]);
        assert_eq!(out.last(), messages.last());
    }

    #[test]
    fn sliding_window_drops_split_tool_results() {
        let messages = tool_conversation(12, 1);
        // 26 messages; the window would start on a tool result at index 7
        let p = pruner(PruningStrategy::SlidingWindow);
        let out = p.prune(&messages, 0, 1, &Provider::named("lmstudio"));
        assert!(is_well_paired(&out));
        assert_eq!(out.len(), 19);
    }

    #[test]
    fn importance_keeps_anchors_and_pairs() {
        let messages = tool_conversation(40, 2_000);
        for provider in ["lmstudio", "openrouter"] {
            let p = pruner(PruningStrategy::Importance);
            let out = p.prune(&messages, 90_000, 100_000, &Provider::named(provider));
            assert!(out.len() < messages.len(), "{provider} should drop messages");
            assert_eq!(out[0].content, "sys");
            assert_eq!(out[1].content, "do the task");
            assert!(is_well_paired(&out), "{provider} split a tool pair");
            assert_eq!(out.last(), messages.last());
        }
    }

    #[test]
    fn floor_restores_minimum() {
        let p = pruner(PruningStrategy::SlidingWindow);
        let t = Provider::named("lmstudio").thresholds();
        let input = plain_conversation(5);
        let out = p.enforce_floor(&input, vec![input[0].clone()], &t);
        assert!(out.len() >= t.min_messages);
        assert_eq!(out[0].role, Role::System);
    }

    #[test]
    fn adaptive_aggressive_when_critical() {
        let messages = tool_conversation(30, 300);
        let p = pruner(PruningStrategy::Adaptive);
        let out = p.prune(&messages, 95_000, 100_000, &Provider::named("lmstudio"));
        assert_eq!(out[0].role, Role::System);
        assert!(out.len() <= 12);
        assert!(is_well_paired(&out));
    }

    #[test]
    fn adaptive_large_reads_are_deduplicated_in_place() {
        // 26 messages, 12 identical reads over 5000 chars
        let payload = "line of file content\n".repeat(300);
        let messages = file_read_conversation(12, &payload);
        let p = pruner(PruningStrategy::Adaptive);

        let out = p.prune(&messages, 87_000, 100_000, &Provider::named("lmstudio"));
        assert_eq!(out.len(), messages.len());
        // reads at least 5 positions before the newest collapse
        assert_eq!(optimized_count(&out), 9);
        assert_eq!(out.last(), messages.last());
        assert!(is_well_paired(&out));
    }

    #[test]
    fn adaptive_large_reads_fall_back_to_sliding_window() {
        let payload = "line of file content\n".repeat(300);
        let messages = file_read_conversation(12, &payload);
        let p = pruner(PruningStrategy::Adaptive);

        // three full reads remain, well over 80% of a 5000-token window
        let out = p.prune(&messages, 4_350, 5_000, &Provider::named("lmstudio"));
        // the window starts on a tool result at index 7 and moves to 8
        assert_eq!(out.len(), 19);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].tool_calls, messages[8].tool_calls);
        assert!(optimized_count(&out) > 0);
        assert!(is_well_paired(&out));
    }

    #[test]
    fn adaptive_long_tool_heavy_history_uses_hybrid() {
        let payload = "pub fn run() {}\n".repeat(20);
        let provider = Provider::named("lmstudio");
        let p = pruner(PruningStrategy::Adaptive);

        // 54 messages and 26 calls: hybrid deduplicates before scoring
        let heavy = file_read_conversation(26, &payload);
        let out = p.prune(&heavy, 50_000, 100_000, &provider);
        assert!(optimized_count(&out) > 0);
        assert!(is_well_paired(&out));

        // 42 messages: plain importance leaves tool output untouched
        let light = file_read_conversation(20, &payload);
        let out = p.prune(&light, 50_000, 100_000, &provider);
        assert_eq!(optimized_count(&out), 0);
        assert!(is_well_paired(&out));
    }

    #[test]
    fn floor_through_prune_keeps_head_and_closed_tail() {
        let mut messages = vec![
            Message::system("sys"),
            Message::user("start"),
            Message::assistant("On it."),
        ];
        for i in 0..5 {
            messages.push(Message::user(format!("follow-up {i}")));
        }
        let calls: Vec<ToolCall> = (0..20)
            .map(|i| ToolCall::new(format!("c{i}"), "shell", format!(r#"{{"n":{i}}}"#)))
            .collect();
        messages.push(Message::assistant_tool_calls("Running everything.", calls));
        for i in 0..20 {
            messages.push(Message::tool_result(format!("c{i}"), "ok"));
        }
        assert_eq!(messages.len(), 29);

        // the window lands inside the result run and keeps only the system
        // message; the floor restores the head and the whole trailing group
        let p = pruner(PruningStrategy::SlidingWindow);
        let out = p.prune(&messages, 0, 1, &Provider::named("lmstudio"));
        assert_eq!(out.len(), 24);
        assert_eq!(&out[..3], &messages[..3]);
        assert_eq!(&out[3..], &messages[8..]);
        assert!(is_well_paired(&out));
    }
}
