//! Turning free-form model text into structured pieces.

use std::sync::LazyLock;

use quill_protocol::{Suggestion, SuggestionKind};
use regex::Regex;

const MAX_SUGGESTIONS: usize = 10;
const MAX_LABEL_CHARS: usize = 60;

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*•]\s+|\d+[.)]\s+)").expect("list marker pattern is valid"));
static TYPE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:int|char|float|double|long|short|unsigned|bool|size_t)\s").expect("type pattern is valid")
});
static CONTROL_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:if|for|while|switch|do)\b").expect("control pattern is valid"));

/// One suggestion per meaningful line, ranked in order of appearance.
///
/// Confidence starts at 0.9 and decays by 0.1 per rank, never below 0.1.
pub fn suggestions_from_text(text: &str) -> Vec<Suggestion> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with("```"))
        .map(|line| LIST_MARKER.replace(line.trim_start(), "").into_owned())
        .filter(|line| !line.is_empty())
        .take(MAX_SUGGESTIONS)
        .enumerate()
        .map(|(rank, line)| Suggestion {
            label: label_for(&line),
            kind: kind_for(&line),
            confidence: confidence_for(rank),
            insert_text: line,
        })
        .collect()
}

pub fn confidence_for(rank: usize) -> f32 {
    let steps = u16::try_from(rank).unwrap_or(u16::MAX);
    (0.9 - 0.1 * f32::from(steps)).max(0.1)
}

/// Short display label: the first line, cut before the first `;` or `{`.
pub fn label_for(content: &str) -> String {
    let first = content.lines().next().unwrap_or_default().trim();
    let cut = first
        .split([';', '{'])
        .next()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .unwrap_or(first);
    let label: String = cut.chars().take(MAX_LABEL_CHARS).collect();
    if label.is_empty() {
        "suggestion".to_owned()
    } else {
        label
    }
}

pub fn kind_for(content: &str) -> SuggestionKind {
    let lower = content.to_lowercase();
    if lower.trim_start().starts_with("#include") {
        SuggestionKind::Module
    } else if TYPE_WORD.is_match(&lower) {
        SuggestionKind::Variable
    } else if CONTROL_WORD.is_match(&lower) {
        SuggestionKind::Snippet
    } else if lower.contains('(') && lower.contains(')') {
        SuggestionKind::Function
    } else {
        SuggestionKind::Text
    }
}

/// Body of the first fenced code block, preferring one tagged `language`.
pub fn code_block(text: &str, language: &str) -> Option<String> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let Some(tag) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        let tag = tag.trim().to_ascii_lowercase();
        let body: Vec<&str> = lines
            .by_ref()
            .take_while(|line| !line.trim_start().starts_with("```"))
            .collect();
        blocks.push((tag, body.join("\n")));
    }
    let language = language.to_ascii_lowercase();
    blocks
        .iter()
        .find(|(tag, _)| *tag == language)
        .or_else(|| blocks.first())
        .map(|(_, body)| body.clone())
}

/// Text with every fenced block removed, trimmed.
pub fn prose_outside_blocks(text: &str) -> String {
    let mut prose = Vec::new();
    let mut inside = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if !inside {
            prose.push(line);
        }
    }
    prose.join("\n").trim().to_owned()
}

/// Separate bulleted or numbered list lines from the surrounding prose.
/// Returns the prose (trimmed) and the list items without their markers.
pub fn split_list_items(prose: &str) -> (String, Vec<String>) {
    let mut kept = Vec::new();
    let mut items = Vec::new();
    for line in prose.lines() {
        let trimmed = line.trim_start();
        match LIST_MARKER.find(trimmed) {
            Some(marker) => {
                let item = trimmed[marker.end()..].trim();
                if !item.is_empty() {
                    items.push(item.to_owned());
                }
            }
            None => kept.push(line),
        }
    }
    (kept.join("\n").trim().to_owned(), items)
}

/// First balanced JSON object in `text`, tolerating surrounding prose or a
/// code fence.
pub fn json_object(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim())
        && value.is_object()
    {
        return Some(value);
    }
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let candidate = &text[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(candidate)
                        .ok()
                        .filter(serde_json::Value::is_object);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_items_are_split_from_prose() {
        let (prose, items) =
            split_list_items("Tidied spacing.\n- Added spaces around =\n  * Renamed x\n2. Dropped dead code\nDone.");
        assert_eq!(prose, "Tidied spacing.\nDone.");
        assert_eq!(items, vec!["Added spaces around =", "Renamed x", "Dropped dead code"]);
    }

    #[test]
    fn suggestions_rank_and_decay() {
        let text = "```c\nint total = 0;\nprintf(\"%d\", total);\n```\n\n1. for (int i = 0; i < n; i++) {\n#include <stdlib.h>\nreturn total";
        let suggestions = suggestions_from_text(text);
        let kinds: Vec<_> = suggestions.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SuggestionKind::Variable,
                SuggestionKind::Function,
                SuggestionKind::Variable,
                SuggestionKind::Module,
                SuggestionKind::Text,
            ]
        );
        assert_eq!(suggestions[0].label, "int total = 0");
        assert_eq!(suggestions[2].insert_text, "for (int i = 0; i < n; i++) {");
        assert!((suggestions[0].confidence - 0.9).abs() < 1e-6);
        assert!((suggestions[4].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn confidence_never_drops_below_floor() {
        assert!((confidence_for(20) - 0.1).abs() < 1e-6);
        assert!(confidence_for(0) <= 1.0);
    }

    #[test]
    fn label_cuts_at_semicolon_or_brace() {
        assert_eq!(label_for("while (x) {\n  x--;\n}"), "while (x)");
        assert_eq!(label_for("puts(\"hi\");"), "puts(\"hi\")");
        assert_eq!(label_for("   "), "suggestion");
    }

    #[test]
    fn code_block_prefers_language_tag() {
        let text = "Here:\n```text\nnot code\n```\nFixed:\n```c\nint x = 1;\n```\nDone.";
        assert_eq!(code_block(text, "c").as_deref(), Some("int x = 1;"));
        assert_eq!(code_block("```\nraw\n```", "c").as_deref(), Some("raw"));
        assert_eq!(code_block("no fences", "c"), None);
        assert_eq!(prose_outside_blocks(text), "Here:\nFixed:\nDone.");
    }

    #[test]
    fn json_object_survives_prose_and_braces_in_strings() {
        let text = "Sure!\n```json\n{\"files\": [{\"name\": \"main.c\", \"content\": \"int main() { return 0; }\"}]}\n```";
        let value = json_object(text).expect("object found");
        assert_eq!(value["files"][0]["name"], "main.c");
        assert!(json_object("no json here").is_none());
    }
}
