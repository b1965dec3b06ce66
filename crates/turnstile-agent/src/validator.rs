//! Response completeness heuristics.
//!
//! Models sometimes stop mid-sentence (output limits, dropped streams).  The
//! turn processor asks a [`CompletenessCheck`] whether an assistant message
//! looks finished before deciding to stop.  The check is a tunable heuristic,
//! so it is a trait: callers can swap in their own.

use std::sync::LazyLock;

use regex::Regex;

/// Predicate deciding whether assistant text looks truncated.
pub trait CompletenessCheck: Send + Sync {
    /// Returns `true` when `content` looks cut off.
    fn is_incomplete(&self, content: &str) -> bool;
}

const SHORT_RESPONSE_WORDS: usize = 10;
const SHORT_COMPLETE_PHRASES: &[&str] = &["done", "yes", "no", "ok", "okay", "completed", "finished"];
const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', ':', ';', ')', ']', '}', '"', '\'', '`', '*'];

/// Lines that legitimately end without punctuation.
static UNPUNCTUATED_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"https?://\S+",            // URL
        r"|\S*[/\\]\S+",            // path
        r"|[-*+]\s+.*",             // bullet
        r"|\d+[.)]\s+.*",           // numbered item
        r"|\|.*\|",                 // table row
        r"|.*[{}\[\]();=<>]\s*",    // code fragment
        r"|#{1,6}\s+.*",            // heading
        r")$",
    ))
    .ok()
});

/// The default heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicValidator;

impl HeuristicValidator {
    fn is_known_short_answer(text: &str) -> bool {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("error:") {
            return true;
        }
        let bare = lower.trim_end_matches(|c: char| c.is_ascii_punctuation());
        SHORT_COMPLETE_PHRASES.contains(&bare)
    }

    fn line_may_end_bare(line: &str) -> bool {
        UNPUNCTUATED_LINE
            .as_ref()
            .is_some_and(|re| re.is_match(line))
    }
}

impl CompletenessCheck for HeuristicValidator {
    fn is_incomplete(&self, content: &str) -> bool {
        let text = content.trim();
        if text.is_empty() {
            return true;
        }

        if text.ends_with("...") || text.ends_with('…') {
            return true;
        }

        if text.matches("```").count() % 2 == 1 {
            return true;
        }

        let ends_with_terminal = text.ends_with(TERMINAL_PUNCTUATION);

        if text.split_whitespace().count() < SHORT_RESPONSE_WORDS {
            return !(ends_with_terminal || Self::is_known_short_answer(text));
        }

        if ends_with_terminal {
            return false;
        }

        let last_line = text.lines().last().unwrap_or(text).trim();
        !Self::line_may_end_bare(last_line)
    }
}
