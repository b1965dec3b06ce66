//! Token estimation.
//!
//! Providers count tokens with their own tokenizers; the engine only needs a
//! cheap, deterministic approximation to decide when to prune.  Estimates are
//! memoized by exact string in a size-bounded [`moka`] cache so repeated
//! passes over a long transcript cost one lookup per message.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use moka::sync::Cache;
use tracing::debug;

use crate::llm::types::Message;

/// Default budget for cached keys, in bytes of key text.
pub const DEFAULT_CACHE_BYTES: u64 = 32 * 1024 * 1024;

/// Framing overhead charged per tool call in a request.
const TOOL_CALL_OVERHEAD: usize = 20;
/// Framing overhead charged per message in a request.
const MESSAGE_OVERHEAD: usize = 10;
/// Safety margin applied to request estimates.
const REQUEST_BUFFER: f64 = 1.05;

const CODE_TOKENS_PER_WORD: f64 = 1.2;
const PROSE_TOKENS_PER_WORD: f64 = 0.75;
const TOKENS_PER_CHAR: f64 = 0.25;
const TOKENS_PER_CONTROL_CHAR: f64 = 0.5;

static CODE_MARKERS: LazyLock<Option<AhoCorasick>> = LazyLock::new(|| {
    AhoCorasick::new([
        "func ", "fn ", "def ", "class ", "import ", "package ", "return;", "const ", "let mut ",
        "struct ", "impl ", "public ", "private ", "#include", "function ", "=>", "::", ");",
        "};",
    ])
    .ok()
});

fn looks_like_code(text: &str) -> bool {
    CODE_MARKERS
        .as_ref()
        .is_some_and(|markers| markers.is_match(text))
}

/// Uncached estimate for a single string.
fn raw_estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let words = text.split_whitespace().count() as f64;
    let per_word = if looks_like_code(text) {
        CODE_TOKENS_PER_WORD
    } else {
        PROSE_TOKENS_PER_WORD
    };
    let by_words = words * per_word;
    let by_chars = text.chars().count() as f64 * TOKENS_PER_CHAR;

    let control = text
        .chars()
        .filter(|c| matches!(c, '\n' | '\r' | '\t'))
        .count() as f64;

    let estimate = by_words.max(by_chars) + control * TOKENS_PER_CONTROL_CHAR;
    (estimate.ceil() as usize).max(1)
}

// ── stats ────────────────────────────────────────────────────────────

/// Hit/miss counters for the estimate cache.
#[derive(Debug, Default)]
pub struct EstimatorStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EstimatorStats {
    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to compute an estimate.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0 (0.0 before any lookup).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for EstimatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── estimator ────────────────────────────────────────────────────────

/// Approximate token counter with a concurrent memo cache.
///
/// Shared by reference (usually behind an `Arc`) between the pruner and the
/// assembler.  Safe to call from any thread.
pub struct TokenEstimator {
    cache: Cache<String, usize>,
    stats: EstimatorStats,
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("entries", &self.cache.entry_count())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}

impl TokenEstimator {
    /// Create an estimator whose cache holds at most `max_key_bytes` of keys.
    pub fn new(max_key_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_key_bytes)
            .weigher(|key: &String, _value: &usize| -> u32 {
                u32::try_from(key.len()).unwrap_or(u32::MAX)
            })
            .build();

        Self {
            cache,
            stats: EstimatorStats::default(),
        }
    }

    /// Estimate the token count of `text`.
    ///
    /// Empty text is 0; any non-empty text is at least 1.
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        if let Some(hit) = self.cache.get(text) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let estimate = raw_estimate(text);
        self.cache.insert(text.to_owned(), estimate);
        estimate
    }

    /// Tokens of one message's content and reasoning.
    pub fn estimate_message(&self, message: &Message) -> usize {
        self.estimate(&message.content)
            + message
                .reasoning_content
                .as_deref()
                .map_or(0, |r| self.estimate(r))
    }

    /// Sum of [`Self::estimate_message`] over `messages`.  Used by pruning.
    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Estimate the size of a full request, including per-message and
    /// per-tool-call framing and a 5% buffer.  Used for threshold checks.
    pub fn estimate_request(&self, messages: &[Message]) -> usize {
        let mut total = 0usize;
        for message in messages {
            total += self.estimate_message(message) + MESSAGE_OVERHEAD;
            for call in &message.tool_calls {
                total += self.estimate(&call.name)
                    + self.estimate(&call.arguments)
                    + TOOL_CALL_OVERHEAD;
            }
        }
        (total as f64 * REQUEST_BUFFER).ceil() as usize
    }

    /// Cache counters.
    pub fn stats(&self) -> &EstimatorStats {
        &self.stats
    }

    /// Number of cached strings.
    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Drop every cached estimate.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
        debug!("token estimate cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolCall;

    #[test]
    fn empty_is_zero_and_text_is_positive() {
        let est = TokenEstimator::default();
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("a"), 1);
        assert!(est.estimate("hello world") >= 1);
    }

    #[test]
    fn prose_uses_char_estimate_when_larger() {
        // 9 words * 0.75 = 6.75; 43 chars * 0.25 = 10.75 -> 11
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(raw_estimate(text), 11);
    }

    #[test]
    fn code_counts_more_per_word() {
        let code = "fn a b c d e f g h i j";
        let prose = "an a b c d e f g h i j";
        assert!(raw_estimate(code) > raw_estimate(prose));
        // 11 words * 1.2 = 13.2 -> 14
        assert_eq!(raw_estimate(code), 14);
    }

    #[test]
    fn everyday_words_are_not_code_markers() {
        assert!(!looks_like_code("I'll let you know when we return to it"));
        assert!(!looks_like_code("the var name is up to you"));
        // 12 words * 0.75 = 9.0; 26 chars * 0.25 = 6.5 -> 9
        assert_eq!(raw_estimate("we let a b c d e f g h i j"), 9);

        assert!(looks_like_code("let mut total = 0;"));
        assert!(looks_like_code("var x = compute();"));
        assert!(looks_like_code("if (done) { return; }"));
    }

    #[test]
    fn control_characters_add_half_a_token() {
        let flat = raw_estimate("abcd abcd");
        let lines = raw_estimate("abcd\nabcd\n");
        // "abcd abcd": max(1.5, 2.25) = 2.25 -> 3
        assert_eq!(flat, 3);
        // 10 chars * 0.25 = 2.5 + 2 * 0.5 = 3.5 -> 4
        assert_eq!(lines, 4);
    }

    #[test]
    fn repeated_estimates_hit_the_cache() {
        let est = TokenEstimator::default();
        let first = est.estimate("some repeated text");
        let second = est.estimate("some repeated text");
        assert_eq!(first, second);
        assert_eq!(est.stats().misses(), 1);
        assert_eq!(est.stats().hits(), 1);

        est.clear();
        assert_eq!(est.estimate("some repeated text"), first);
        assert_eq!(est.stats().misses(), 2);
    }

    #[test]
    fn request_estimate_includes_framing() {
        let est = TokenEstimator::default();
        let messages = vec![
            Message::user("hi"),
            Message::assistant_tool_calls(
                "",
                vec![ToolCall::new("c1", "read_file", r#"{"path":"a"}"#)],
            ),
        ];
        let content = est.estimate_messages(&messages);
        let request = est.estimate_request(&messages);
        let tool = est.estimate("read_file") + est.estimate(r#"{"path":"a"}"#) + 20;
        let expected = ((content + 2 * 10 + tool) as f64 * 1.05).ceil() as usize;
        assert_eq!(request, expected);
    }
}
