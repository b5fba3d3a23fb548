//! Prompt for transcript-based learning extraction.
//!
//! Placeholders: `{known}` - titles already stored for the repository,
//! `{transcript}` - the formatted session transcript.

use crate::memory::types::Learning;

/// Maximum number of known titles listed in the prompt.
const MAX_KNOWN_TITLES: usize = 50;

pub const EXTRACTION_PROMPT: &str = r#"Below is a transcript of a coding-assistant session. Pull out knowledge about THIS project that would make future sessions faster.

Keep only:
- preferences the user stated (style, formatting, tools)
- conventions of this codebase found during the session
- architectural decisions or patterns particular to this project
- domain facts the user had to explain
- corrections the user made to the assistant's approach

Leave out:
- general programming knowledge or common best practice
- one-off debugging steps and temporary workarounds
- anything obvious from reading the code
- vague observations that depend on the moment

Already recorded for this project (do not repeat these):
{known}

Answer with a JSON array only; answer [] when nothing qualifies. Each element:
{
  "title": "short specific title, at most 10 words",
  "context": "when this applies",
  "learning": "the insight in one or two sentences",
  "confidence": "high" or "medium",
  "type": "rule", "heuristic", "source", "process" or "constraint"
}

When unsure, leave the learning out.

Transcript:
{transcript}"#;

/// Fill the extraction prompt.
pub fn build_prompt(transcript: &str, existing: &[Learning]) -> String {
    let known = if existing.is_empty() {
        "(none)".to_string()
    } else {
        existing
            .iter()
            .take(MAX_KNOWN_TITLES)
            .map(|l| format!("- {}", l.title))
            .collect::<Vec<_>>()
            .join("\n")
    };
    EXTRACTION_PROMPT
        .replace("{known}", &known)
        .replace("{transcript}", transcript)
}
