//! Transcript formatting and model-reply parsing.

use serde_json::Value;

use super::ExtractedLearning;
use crate::config::ExtractionConfig;

const TRUNCATION_MARKER: &str = "... [truncated]";

/// Messages of a transcript: the `messages` array, or the value itself when
/// it is already an array.
pub fn messages(transcript: &Value) -> &[Value] {
    transcript
        .get("messages")
        .unwrap_or(transcript)
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Flatten one message's content. Block lists keep text blocks and mark tool
/// calls and results.
fn message_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => Some(
                    block
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                ),
                Some("tool_use") => Some(format!(
                    "[Tool: {}]",
                    block.get("name").and_then(Value::as_str).unwrap_or("unknown")
                )),
                Some("tool_result") => Some("[Tool Result]".to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text,
    }
}

/// Render messages as `[ROLE]\ncontent\n` blocks. Empty messages are skipped
/// and long ones truncated to `max_message_chars`.
pub fn format_transcript(messages: &[Value], max_message_chars: usize) -> String {
    messages
        .iter()
        .filter_map(|msg| {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("unknown");
            let text = message_text(msg.get("content").unwrap_or(&Value::Null));
            if text.trim().is_empty() {
                return None;
            }
            Some(format!(
                "[{}]\n{}\n",
                role.to_uppercase(),
                truncate_chars(text, max_message_chars)
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Why a transcript was not sent for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooFewMessages(usize),
    TooShort(usize),
}

/// Select the last `max_messages` messages and format them, or explain why
/// the transcript is not worth extracting from.
pub fn prepare(transcript: &Value, config: &ExtractionConfig) -> Result<String, SkipReason> {
    let all = messages(transcript);
    if all.len() < config.min_messages {
        return Err(SkipReason::TooFewMessages(all.len()));
    }
    let recent = &all[all.len().saturating_sub(config.max_messages)..];
    let text = format_transcript(recent, config.max_message_chars);
    let chars = text.chars().count();
    if chars < config.min_transcript_chars {
        return Err(SkipReason::TooShort(chars));
    }
    Ok(text)
}

/// Strip a surrounding markdown code fence, if any.
fn unfence(content: &str) -> &str {
    let Some(start) = content.find("```") else {
        return content;
    };
    let body = &content[start + 3..];
    let body = body.strip_prefix("json").unwrap_or(body);
    match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Parse the model's reply into candidates. Accepts a bare JSON array or one
/// wrapped in a code fence. Entries without a non-empty `title` and
/// `learning` are dropped; an unparseable reply yields nothing.
pub fn parse_learnings(content: &str) -> Vec<ExtractedLearning> {
    let body = unfence(content);
    let array = match (body.find('['), body.rfind(']')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => return Vec::new(),
    };
    let Ok(entries) = serde_json::from_str::<Vec<Value>>(array) else {
        tracing::warn!("extraction reply is not a JSON array");
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<ExtractedLearning>(entry).ok())
        .filter(|l| !l.title.trim().is_empty() && !l.learning.trim().is_empty())
        .collect()
}
