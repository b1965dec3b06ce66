//! Tool calls written into message content.
//!
//! Some models answer with a tool call serialized into their text instead of
//! the structured `tool_calls` field.  [`parse_tool_calls`] recovers those
//! calls from three shapes:
//!
//! - JSON, fenced or bare: a `{"tool_calls": [...]}` wrapper (optionally under
//!   `message`), an array of call objects, or a single call object,
//! - XML: `<function=NAME><parameter=KEY>VALUE</parameter></function>`,
//!   optionally wrapped in `<tool_call>` tags,
//! - function style: `name: NAME` followed by a JSON arguments object.
//!
//! Candidates without a tool name are dropped.  The recovered blocks are cut
//! out of the content and what remains is returned as the cleaned text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::llm::types::ToolCall;

const TOOL_CALL_PATTERNS: &[&str] = &[
    r#""tool_calls""#,
    r#""function""#,
    r#""function_call""#,
    r#""arguments""#,
    r#""name""#,
    "name:",
    "arguments:",
    "<function=",
    "<tool_call",
];

static CODE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\s*(.*?)```").ok());
static XML_FUNCTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<function=([^>]+)>(.*?)</function>").ok());
static XML_PARAMETER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<parameter=([^>]+)>(.*?)</parameter>").ok());
static XML_OPEN_WRAPPER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<tool_call>\s*$").ok());
static XML_CLOSE_WRAPPER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*</tool_call>").ok());
static FUNCTION_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"name:\s*(\w[\w.-]*)").ok());
static ID_UNSAFE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]+").ok());

/// Calls recovered from content, plus the content with them removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCalls {
    pub tool_calls: Vec<ToolCall>,
    pub cleaned_content: String,
}

/// Whether `content` mentions anything shaped like a tool call.
pub fn contains_tool_call_patterns(content: &str) -> bool {
    TOOL_CALL_PATTERNS.iter().any(|p| content.contains(p))
}

/// Recover tool calls from `content`.
///
/// # Errors
///
/// [`AgentError::ModelParseFailed`] when the content holds no tool-call
/// pattern, or when no candidate yields a named call.
pub fn parse_tool_calls(content: &str) -> Result<ParsedToolCalls> {
    let content = content.trim();
    if content.is_empty() || !contains_tool_call_patterns(content) {
        return Err(AgentError::ModelParseFailed {
            reason: "content has no tool call patterns".into(),
        });
    }

    let mut blocks = json_blocks(content);
    blocks.extend(xml_blocks(content));
    blocks.extend(function_blocks(content));
    let blocks = merge_blocks(blocks);

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut tool_calls = Vec::new();
    for mut call in blocks.iter().flat_map(|b| b.calls.iter().cloned()) {
        if call.name.trim().is_empty() {
            continue;
        }
        if !seen.insert((call.name.clone(), call.arguments.clone())) {
            continue;
        }
        if call.id.is_empty() {
            call.id = fallback_id(&call.name);
        }
        tool_calls.push(call);
    }

    if tool_calls.is_empty() {
        return Err(AgentError::ModelParseFailed {
            reason: "no valid tool calls found in content".into(),
        });
    }

    debug!(
        recovered = tool_calls.len(),
        blocks = blocks.len(),
        "recovered tool calls from content"
    );
    Ok(ParsedToolCalls {
        tool_calls,
        cleaned_content: remove_blocks(content, &blocks),
    })
}

// ── blocks ───────────────────────────────────────────────────────────

/// Byte range `start..end` of `content` that produced `calls`.
#[derive(Debug, Clone)]
struct Block {
    calls: Vec<ToolCall>,
    start: usize,
    end: usize,
}

fn json_blocks(content: &str) -> Vec<Block> {
    let mut blocks = Vec::new();

    if let Some(re) = CODE_BLOCK.as_ref() {
        for caps in re.captures_iter(content) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !contains_tool_call_patterns(inner.as_str()) {
                continue;
            }
            let calls = calls_from_json(inner.as_str());
            if !calls.is_empty() {
                blocks.push(Block {
                    calls,
                    start: whole.start(),
                    end: whole.end(),
                });
            }
        }
    }

    for (start, end) in json_segments(content) {
        let raw = &content[start..end];
        if !contains_tool_call_patterns(raw) {
            continue;
        }
        if blocks.iter().any(|b| start >= b.start && end <= b.end) {
            continue;
        }
        let calls = calls_from_json(raw);
        if !calls.is_empty() {
            blocks.push(Block { calls, start, end });
        }
    }

    blocks
}

fn xml_blocks(content: &str) -> Vec<Block> {
    let Some(re) = XML_FUNCTION.as_ref() else {
        return Vec::new();
    };

    let mut blocks = Vec::new();
    for caps in re.captures_iter(content) {
        let (Some(whole), Some(name), Some(inner)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };

        let mut start = whole.start();
        let mut end = whole.end();
        if let Some(open) = XML_OPEN_WRAPPER
            .as_ref()
            .and_then(|re| re.find(&content[..start]))
        {
            start = open.start();
        }
        if let Some(close) = XML_CLOSE_WRAPPER
            .as_ref()
            .and_then(|re| re.find(&content[end..]))
        {
            end += close.end();
        }

        if let Some(call) = call_from_args(name.as_str(), xml_parameters(inner.as_str())) {
            blocks.push(Block {
                calls: vec![call],
                start,
                end,
            });
        }
    }
    blocks
}

fn function_blocks(content: &str) -> Vec<Block> {
    let Some(re) = FUNCTION_NAME.as_ref() else {
        return Vec::new();
    };

    let mut blocks = Vec::new();
    for caps in re.captures_iter(content) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some((seg_start, seg_end)) = find_json_segment(content, whole.end()) else {
            continue;
        };
        let args = serde_json::from_str::<Map<String, Value>>(&content[seg_start..seg_end])
            .unwrap_or_default();
        if let Some(call) = call_from_args(name.as_str(), args) {
            blocks.push(Block {
                calls: vec![call],
                start: whole.start(),
                end: seg_end,
            });
        }
    }
    blocks
}

/// Sort by position and fold overlapping blocks together.
fn merge_blocks(mut blocks: Vec<Block>) -> Vec<Block> {
    blocks.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

    let mut merged: Vec<Block> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match merged.last_mut() {
            Some(last) if block.start <= last.end => {
                last.end = last.end.max(block.end);
                last.calls.extend(block.calls);
            }
            _ => merged.push(block),
        }
    }
    merged
}

/// Cut `blocks` (sorted, disjoint) out of `content` and drop blank lines.
fn remove_blocks(content: &str, blocks: &[Block]) -> String {
    let mut kept = String::with_capacity(content.len());
    let mut prev = 0;
    for block in blocks {
        let start = block.start.clamp(prev, content.len());
        kept.push_str(&content[prev..start]);
        prev = block.end.clamp(start, content.len());
    }
    kept.push_str(&content[prev..]);

    kept.lines()
        .map(|line| line.trim_end_matches([' ', '\t']))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

// ── JSON ─────────────────────────────────────────────────────────────

fn calls_from_json(raw: &str) -> Vec<ToolCall> {
    let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
        return Vec::new();
    };

    let wrapped: Vec<ToolCall> = [
        value.get("tool_calls"),
        value.get("message").and_then(|m| m.get("tool_calls")),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_array)
    .flatten()
    .filter_map(call_from_value)
    .collect();
    if !wrapped.is_empty() {
        return wrapped;
    }

    if let Some(items) = value.as_array() {
        return items.iter().filter_map(call_from_value).collect();
    }

    call_from_value(&value).into_iter().collect()
}

fn call_from_value(value: &Value) -> Option<ToolCall> {
    let object = value.as_object()?;
    let name = tool_name(object)?;
    let arguments = normalize_arguments(raw_arguments(object));
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(ToolCall::new(id, name, arguments))
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn tool_name(object: &Map<String, Value>) -> Option<&str> {
    ["function", "function_call"]
        .iter()
        .find_map(|key| non_empty(object.get(*key).and_then(|f| f.get("name"))))
        .or_else(|| {
            ["name", "tool", "function"]
                .iter()
                .find_map(|key| non_empty(object.get(*key)))
        })
}

fn raw_arguments(object: &Map<String, Value>) -> Option<&Value> {
    ["function", "function_call"]
        .iter()
        .find_map(|key| object.get(*key).and_then(|f| f.get("arguments")))
        .or_else(|| {
            ["arguments", "args", "input"]
                .iter()
                .find_map(|key| object.get(*key))
        })
}

/// Arguments as a JSON text.  A string holding JSON is unwrapped; any other
/// string becomes a JSON string literal.
fn normalize_arguments(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "{}".to_owned(),
        Some(Value::String(text)) => {
            let inner = text.trim();
            if inner.is_empty() {
                "{}".to_owned()
            } else if serde_json::from_str::<Value>(inner).is_ok() {
                inner.to_owned()
            } else {
                Value::String(inner.to_owned()).to_string()
            }
        }
        Some(other) => other.to_string(),
    }
}

fn call_from_args(name: &str, args: Map<String, Value>) -> Option<ToolCall> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(ToolCall::new("", name, Value::Object(args).to_string()))
}

fn xml_parameters(inner: &str) -> Map<String, Value> {
    let mut args = Map::new();
    if let Some(re) = XML_PARAMETER.as_ref() {
        for caps in re.captures_iter(inner) {
            let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let name = name.as_str().trim();
            if name.is_empty() {
                continue;
            }
            let value = value.as_str().trim();
            let parsed = serde_json::from_str::<Value>(value)
                .unwrap_or_else(|_| Value::String(value.to_owned()));
            args.insert(name.to_owned(), parsed);
        }
    }

    if args.is_empty() {
        if let Ok(object) = serde_json::from_str::<Map<String, Value>>(inner.trim()) {
            return object;
        }
    }
    args
}

// ── scanning ─────────────────────────────────────────────────────────

/// Top-level balanced `{...}` / `[...]` ranges, ignoring brackets inside
/// string literals.
fn json_segments(content: &str) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, byte) in content.bytes().enumerate() {
        if escape {
            escape = false;
            continue;
        }
        match byte {
            b'\\' => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'{' | b'[' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' | b']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    segments.push((start, i + 1));
                }
            }
            _ => {}
        }
    }
    segments
}

/// The first balanced and valid JSON value opening at or after `from`.
fn find_json_segment(content: &str, from: usize) -> Option<(usize, usize)> {
    content
        .bytes()
        .enumerate()
        .skip(from)
        .filter(|(_, b)| matches!(b, b'{' | b'['))
        .find_map(|(i, _)| read_balanced_json(content, i))
}

fn read_balanced_json(content: &str, start: usize) -> Option<(usize, usize)> {
    let mut in_string = false;
    let mut escape = false;
    let mut depth = 0usize;

    for (offset, byte) in content[start..].bytes().enumerate() {
        if escape {
            escape = false;
            continue;
        }
        match byte {
            b'\\' => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + 1;
                    return serde_json::from_str::<Value>(&content[start..end])
                        .is_ok()
                        .then_some((start, end));
                }
            }
            _ => {}
        }
    }
    None
}

fn fallback_id(name: &str) -> String {
    let lower = name.to_lowercase();
    let sanitized = ID_UNSAFE
        .as_ref()
        .map(|re| re.replace_all(&lower, "_").into_owned())
        .unwrap_or(lower);
    let sanitized = sanitized.trim_matches('_');
    let sanitized = if sanitized.is_empty() { "tool" } else { sanitized };
    format!("fallback_{sanitized}_{}", Uuid::now_v7().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(parsed: &ParsedToolCalls) -> Vec<&str> {
        parsed.tool_calls.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn plain_prose_is_not_a_candidate() {
        assert!(!contains_tool_call_patterns("I fixed the bug in main.rs."));
        assert!(matches!(
            parse_tool_calls("I fixed the bug in main.rs."),
            Err(AgentError::ModelParseFailed { .. })
        ));
        assert!(parse_tool_calls("   ").is_err());
    }

    #[test]
    fn fenced_openai_style_call() {
        let content = "Let me read it.\n```json\n{\"tool_calls\":[{\"id\":\"call_9\",\"type\":\"function\",\
                       \"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"path\\\":\\\"src/main.rs\\\"}\"}}]}\n```\n";
        let parsed = parse_tool_calls(content).unwrap();
        assert_eq!(names(&parsed), vec!["read_file"]);
        assert_eq!(parsed.tool_calls[0].id, "call_9");
        assert_eq!(parsed.tool_calls[0].arguments, r#"{"path":"src/main.rs"}"#);
        assert_eq!(parsed.cleaned_content, "Let me read it.");
    }

    #[test]
    fn array_keeps_valid_candidates_only() {
        let content = r#"[
            {"name": "read_file", "arguments": {"path": "a.rs"}},
            {"arguments": {"path": "b.rs"}},
            "not a call",
            {"tool": "shell_command", "args": {"command": "ls"}},
            {"name": "", "arguments": {}}
        ]"#;
        let parsed = parse_tool_calls(content).unwrap();
        assert_eq!(names(&parsed), vec!["read_file", "shell_command"]);
        assert!(parsed.tool_calls.iter().all(|c| c.id.starts_with("fallback_")));
        assert_ne!(parsed.tool_calls[0].id, parsed.tool_calls[1].id);
        assert_eq!(parsed.tool_calls[1].parsed_arguments().unwrap()["command"], "ls");
        assert!(parsed.cleaned_content.is_empty());
    }

    #[test]
    fn bare_object_inside_prose() {
        let content = "I'll check the file.\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"Cargo.toml\"}}\nThen I'll fix it.";
        let parsed = parse_tool_calls(content).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.cleaned_content, "I'll check the file.\nThen I'll fix it.");
    }

    #[test]
    fn xml_function_with_parameters_and_wrapper() {
        let content = "Running it now.\n<tool_call>\n<function=shell_command>\n\
                       <parameter=command>cargo fmt</parameter>\n<parameter=timeout>30</parameter>\n\
                       </function>\n</tool_call>";
        let parsed = parse_tool_calls(content).unwrap();
        assert_eq!(names(&parsed), vec!["shell_command"]);
        let args = parsed.tool_calls[0].parsed_arguments().unwrap();
        assert_eq!(args["command"], "cargo fmt");
        assert_eq!(args["timeout"], 30);
        assert_eq!(parsed.cleaned_content, "Running it now.");
    }

    #[test]
    fn function_style_name_then_arguments() {
        let content = "name: read_file\narguments: {\"path\": \"src/lib.rs\"}";
        let parsed = parse_tool_calls(content).unwrap();
        assert_eq!(names(&parsed), vec!["read_file"]);
        assert_eq!(parsed.tool_calls[0].parsed_arguments().unwrap()["path"], "src/lib.rs");
    }

    #[test]
    fn repeated_calls_are_collapsed() {
        let content = r#"{"name":"read_file","arguments":{"path":"a"}} and again {"name":"read_file","arguments":{"path":"a"}}"#;
        let parsed = parse_tool_calls(content).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.cleaned_content, "and again");
    }

    #[test]
    fn json_without_a_name_fails() {
        let err = parse_tool_calls(r#"{"arguments": {"path": "a"}}"#).unwrap_err();
        assert!(matches!(err, AgentError::ModelParseFailed { .. }));
    }

    #[test]
    fn argument_normalization() {
        assert_eq!(normalize_arguments(None), "{}");
        assert_eq!(normalize_arguments(Some(&Value::String("  ".into()))), "{}");
        assert_eq!(
            normalize_arguments(Some(&Value::String(r#"{"a":1}"#.into()))),
            r#"{"a":1}"#
        );
        assert_eq!(
            normalize_arguments(Some(&Value::String("ls -la".into()))),
            r#""ls -la""#
        );
        assert_eq!(normalize_arguments(Some(&serde_json::json!({"b": 2}))), r#"{"b":2}"#);
    }

    #[test]
    fn segments_skip_brackets_in_strings() {
        let text = r#"x {"a": "}{"} y [1, [2]] z"#;
        let segments: Vec<&str> = json_segments(text)
            .into_iter()
            .map(|(s, e)| &text[s..e])
            .collect();
        assert_eq!(segments, vec![r#"{"a": "}{"}"#, "[1, [2]]"]);
    }
}
