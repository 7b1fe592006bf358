//! Parsing of worker completions into structured reports.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Confidence assigned to unstructured replies.
pub const PLAIN_TEXT_CONFIDENCE: f32 = 0.5;

static FENCED_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
static URL: OnceLock<Option<Regex>> = OnceLock::new();

fn fenced_block() -> Option<&'static Regex> {
    FENCED_BLOCK
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok())
        .as_ref()
}

fn url_pattern() -> Option<&'static Regex> {
    URL.get_or_init(|| Regex::new(r#"https?://[^\s<>"'`\)\]]+"#).ok())
        .as_ref()
}

/// One parsed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub findings: String,
    pub sources: Vec<String>,
    pub confidence: f32,
    pub gaps: Vec<String>,
    /// Whether the model considers the task's success criteria met.
    pub criteria_met: bool,
    pub topic: Option<String>,
    /// False when the reply was free text.
    pub structured: bool,
}

/// Every `http(s)://` URL in `text`, in order, without duplicates.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    if let Some(re) = url_pattern() {
        for m in re.find_iter(text) {
            let url = m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string();
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

/// Locate a JSON value in a completion: the whole text, a fenced code block,
/// or the outermost `{...}` / `[...]` span.
pub fn find_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if let Some(re) = fenced_block() {
        for caps in re.captures_iter(text) {
            if let Some(body) = caps.get(1) {
                if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                    return Some(value);
                }
            }
        }
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(obj) => obj
                    .get("url")
                    .or_else(|| obj.get("source"))
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn findings_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => format!("- {s}"),
                    other => format!("- {other}"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

fn from_object(value: &Value) -> Option<WorkerReport> {
    let obj = value.as_object()?;
    let findings = findings_text(obj.get("findings"))?;
    let mut sources = Vec::new();
    for source in string_list(obj.get("sources")) {
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .unwrap_or(PLAIN_TEXT_CONFIDENCE);
    Some(WorkerReport {
        findings,
        sources,
        confidence,
        gaps: string_list(obj.get("gaps")),
        criteria_met: obj
            .get("criteria_met")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        topic: obj
            .get("topic")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        structured: true,
    })
}

/// Parse a completion. Structured JSON reports are preferred; anything else
/// becomes free-text findings with URLs as sources.
pub fn parse_report(text: &str) -> WorkerReport {
    if let Some(report) = find_json(text).as_ref().and_then(from_object) {
        return report;
    }
    WorkerReport {
        findings: text.trim().to_string(),
        sources: extract_urls(text),
        confidence: PLAIN_TEXT_CONFIDENCE,
        gaps: Vec::new(),
        criteria_met: true,
        topic: None,
        structured: false,
    }
}
