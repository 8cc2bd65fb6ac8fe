//! Tolerant parsing of generative replies.
//!
//! Models wrap JSON in prose or code fences, rename keys and mix objects
//! with bare strings; everything here accepts those shapes and reports an
//! error only when no usable JSON is present at all.

use anyhow::{anyhow, Result};
use insightdb_core::types::{CommentaryLine, InsightKind};
use serde_json::{Map, Value};

pub const HOST: &str = "Host";
pub const ANALYST: &str = "Analyst";

const ID_KEYS: &[&str] = &["chunk_id", "id", "section_id", "candidate_id"];
const SPEAKER_KEYS: &[&str] = &["speaker", "role", "name"];
const LINE_KEYS: &[&str] = &["text", "line", "content", "message"];
const COMMENTARY_KEYS: &[&str] = &["commentary", "conversation", "dialogue"];
pub const SCRIPT_KEYS: &[&str] = &["conversation", "dialogue", "script", "podcast", "messages", "exchanges", "lines"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryReply {
    /// Echoed candidate ids in reply order; may contain unknown ids.
    pub picks: Vec<String>,
    pub commentary: Vec<CommentaryLine>,
}

pub fn alternative_keys(kind: InsightKind) -> &'static [&'static str] {
    match kind {
        InsightKind::Contradiction => &["contradictory", "opposing", "conflicts", "disagreements"],
        InsightKind::Enhancement => &["details", "expansions", "elaborations", "specifics"],
        InsightKind::Connection => &["related", "links", "associations", "relationships"],
    }
}

/// Alternating speaker for the `index`-th line of an unattributed script.
pub fn speaker_for(index: usize) -> &'static str {
    if index % 2 == 0 { HOST } else { ANALYST }
}

/// Finds the JSON value in a raw reply: the whole text, a fenced block, or the
/// outermost `{...}` / `[...]` span.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(fenced) {
            return Some(v);
        }
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

pub fn parse_category_reply(kind: InsightKind, raw: &str) -> Result<CategoryReply> {
    let value = extract_json(raw).ok_or_else(|| anyhow!("no JSON in {} reply", kind.as_str()))?;
    let (list, commentary) = match &value {
        Value::Object(obj) => (pick_list(kind, obj)?, commentary_from(obj)),
        Value::Array(items) => (items.as_slice(), Vec::new()),
        _ => return Err(anyhow!("{} reply is not an object", kind.as_str())),
    };
    let picks = list.iter().filter_map(pick_id).collect();
    Ok(CategoryReply { picks, commentary })
}

fn pick_list<'a>(kind: InsightKind, obj: &'a Map<String, Value>) -> Result<&'a [Value]> {
    if let Some(Value::Array(items)) = obj.get(kind.response_key()) {
        return Ok(items);
    }
    for key in alternative_keys(kind) {
        if let Some(Value::Array(items)) = obj.get(*key) {
            tracing::debug!(kind = kind.as_str(), key, "using alternative reply key");
            return Ok(items);
        }
    }
    obj.iter()
        .find(|(k, v)| !COMMENTARY_KEYS.contains(&k.as_str()) && v.is_array())
        .and_then(|(_, v)| v.as_array().map(Vec::as_slice))
        .ok_or_else(|| anyhow!("no result list in {} reply", kind.as_str()))
}

fn pick_id(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => ID_KEYS.iter().find_map(|k| match obj.get(*k)? {
            Value::String(s) => non_empty(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn commentary_from(obj: &Map<String, Value>) -> Vec<CommentaryLine> {
    COMMENTARY_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array))
        .map(|items| script_lines(items))
        .unwrap_or_default()
}

/// Lines of a script given as objects (`{"speaker", "text"}`) or bare strings.
/// Bare strings alternate Host/Analyst by position.
pub fn script_lines(items: &[Value]) -> Vec<CommentaryLine> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Value::String(s) => non_empty(s).map(|text| CommentaryLine::new(speaker_for(i), text)),
            Value::Object(obj) => {
                let text = LINE_KEYS.iter().find_map(|k| obj.get(*k).and_then(Value::as_str)).and_then(non_empty)?;
                let speaker = SPEAKER_KEYS
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .and_then(non_empty)
                    .unwrap_or_else(|| speaker_for(i).to_string());
                Some(CommentaryLine::new(speaker, text))
            }
            _ => None,
        })
        .collect()
}

/// Script lines from a persona reply: a keyed array, a top-level array, or
/// `Host:` / `Analyst:` prefixed plain-text lines.
pub fn parse_script_reply(raw: &str) -> Vec<CommentaryLine> {
    match extract_json(raw) {
        Some(Value::Object(obj)) => {
            if let Some(items) = SCRIPT_KEYS.iter().find_map(|k| obj.get(*k).and_then(Value::as_array)) {
                return script_lines(items);
            }
        }
        Some(Value::Array(items)) => return script_lines(&items),
        _ => {}
    }
    raw.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['*', '-', ' ']);
            [HOST, ANALYST].iter().find_map(|speaker| {
                let rest = line.strip_prefix(speaker)?.trim_start_matches(['*', ' ']);
                let text = rest.strip_prefix(':')?;
                non_empty(text).map(|t| CommentaryLine::new(*speaker, t))
            })
        })
        .collect()
}
