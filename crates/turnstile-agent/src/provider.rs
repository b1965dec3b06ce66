//! Provider identity, threshold table and per-provider policies.
//!
//! Providers fall into three classes that share one pruning threshold table.
//! The table is read-only; every policy here is a pure function of the
//! provider name.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pruning behaviour class of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderClass {
    /// Large context windows; prune on percentage only.
    HighContext,
    /// Everything not listed elsewhere.
    Default,
    /// Cached prompt tokens are discounted; prune only when headroom runs
    /// out so the cached prefix survives as long as possible.
    CachedDiscount,
}

/// Per-class pruning thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PruningThresholds {
    pub standard_percent: f64,
    pub standard_tokens: Option<usize>,
    pub aggressive_percent: f64,
    pub remaining_tokens_limit: usize,
    pub remaining_percent_limit: f64,
    pub nominal_context_tokens: usize,
    pub target_percent: f64,
    pub min_messages: usize,
    pub recent_messages: usize,
    pub sliding_window: usize,
}

const BASE_THRESHOLDS: PruningThresholds = PruningThresholds {
    standard_percent: 0.85,
    standard_tokens: None,
    aggressive_percent: 0.90,
    remaining_tokens_limit: 20_000,
    remaining_percent_limit: 0.20,
    nominal_context_tokens: 100_000,
    target_percent: 0.60,
    min_messages: 3,
    recent_messages: 10,
    sliding_window: 20,
};

impl PruningThresholds {
    /// Thresholds for a provider class.
    pub const fn for_class(class: ProviderClass) -> Self {
        match class {
            ProviderClass::HighContext => Self {
                target_percent: 0.70,
                ..BASE_THRESHOLDS
            },
            ProviderClass::Default => Self {
                standard_tokens: Some(85_000),
                ..BASE_THRESHOLDS
            },
            ProviderClass::CachedDiscount => BASE_THRESHOLDS,
        }
    }

    /// Token budget for importance-based selection.
    ///
    /// Long conversations get a smaller budget: 10 000 tokens less at 20
    /// messages, 20 000 less at 50.
    pub fn importance_target(&self, message_count: usize) -> usize {
        let base = (self.nominal_context_tokens as f64 * self.target_percent).round() as usize;
        let reduction = if message_count >= 50 {
            20_000
        } else if message_count >= 20 {
            10_000
        } else {
            0
        };
        base.saturating_sub(reduction)
    }
}

const STRICT_PAIRING: &[&str] = &["openai", "anthropic", "deepseek", "minimax", "openrouter"];
const IMPLICIT_COMPLETION: &[&str] = &["openai"];
const REJECTS_REASONING: &[&str] = &["deepseek"];

/// The model provider a conversation talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    /// Lowercase provider name, e.g. `openai` or `openrouter`.
    pub name: String,
    /// Model identifier, informational only.
    #[serde(default)]
    pub model: String,
}

impl Provider {
    /// Create a provider; the name is normalized to lowercase.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_lowercase(),
            model: model.into(),
        }
    }

    /// Shorthand for a provider with no model name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    fn is_one_of(&self, names: &[&str]) -> bool {
        names.contains(&self.name.as_str())
    }

    /// The pruning class for this provider.
    pub fn class(&self) -> ProviderClass {
        match self.name.as_str() {
            "openai" => ProviderClass::CachedDiscount,
            "anthropic" | "gemini" => ProviderClass::HighContext,
            _ => ProviderClass::Default,
        }
    }

    /// Threshold table row for this provider.
    pub fn thresholds(&self) -> PruningThresholds {
        PruningThresholds::for_class(self.class())
    }

    /// Whether the provider rejects requests with unpaired tool calls or
    /// results, so pruning must work on whole tool groups.
    pub fn requires_strict_tool_pairing(&self) -> bool {
        self.is_one_of(STRICT_PAIRING)
    }

    /// Whether a plain text answer (without the completion marker) may end
    /// the task.
    pub fn allows_implicit_completion(&self) -> bool {
        self.is_one_of(IMPLICIT_COMPLETION)
    }

    /// Whether `reasoning_content` must be stripped before sending.
    pub fn rejects_reasoning_content(&self) -> bool {
        self.is_one_of(REJECTS_REASONING)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.model.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.name, self.model)
        }
    }
}
