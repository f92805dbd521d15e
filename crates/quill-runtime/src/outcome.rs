//! Turning provider replies into structured outcomes.
//!
//! Every parser first looks for a JSON object with the expected fields and
//! then falls back to a fenced code block plus the surrounding prose. A
//! reply that yields nothing usable is a `MalformedResponse`, which the
//! dispatcher treats like any other failed attempt.

use quill_protocol::{
    DiagnosisOutcome, GeneratedFile, GenerationOutcome, IssueSeverity, ProviderError,
    ProviderResponse, RefactorOutcome, ReviewIssue, ReviewOutcome,
};
use quill_providers::parse::{code_block, json_object, prose_outside_blocks, split_list_items};
use serde_json::Value;

const DEFAULT_MAIN_FILE: &str = "main.c";
const ISSUE_WORDS: &[&str] = &[
    "bug", "error", "issue", "problem", "unsafe", "overflow", "leak", "undefined", "crash",
];

fn string_field(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(|value| value.trim_end().to_owned())
}

fn malformed(response: &ProviderResponse, what: &str) -> ProviderError {
    ProviderError::MalformedResponse(format!("{}: reply has no {what}", response.provider))
}

/// `original` is the code that was sent; an empty rewrite is only accepted
/// when it was blank too.
pub fn parse_refactor(
    response: &ProviderResponse,
    language: &str,
    original: &str,
) -> Result<RefactorOutcome, ProviderError> {
    let text = response.text.as_str();
    let blank_input = original.trim().is_empty();
    if let Some(object) = json_object(text)
        && let Some(code) =
            string_field(&object, "refactored_code").filter(|c| !c.trim().is_empty() || blank_input)
    {
        return Ok(RefactorOutcome {
            refactored_code: code,
            explanation: string_field(&object, "explanation").unwrap_or_default(),
            changes: string_list(&object, "changes"),
            provider: response.provider.clone(),
        });
    }

    let code = code_block(text, language)
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| malformed(response, "refactored code"))?;
    let (explanation, changes) = split_list_items(&prose_outside_blocks(text));
    Ok(RefactorOutcome {
        refactored_code: code,
        explanation,
        changes,
        provider: response.provider.clone(),
    })
}

pub fn parse_diagnosis(
    response: &ProviderResponse,
    language: &str,
) -> Result<DiagnosisOutcome, ProviderError> {
    let text = response.text.as_str();
    if let Some(object) = json_object(text)
        && let Some(diagnosis) = string_field(&object, "diagnosis").filter(|d| !d.is_empty())
    {
        return Ok(DiagnosisOutcome {
            diagnosis,
            suggested_fix: string_field(&object, "suggested_fix").unwrap_or_default(),
            explanation: string_field(&object, "explanation").unwrap_or_default(),
            provider: response.provider.clone(),
        });
    }

    // Free-form reply: first prose paragraph is the diagnosis, the rest
    // explains, and a code block (if any) is the fix.
    let prose = prose_outside_blocks(text);
    let mut paragraphs = prose.splitn(2, "\n\n");
    let diagnosis = paragraphs
        .next()
        .map(str::trim)
        .filter(|diagnosis| !diagnosis.is_empty())
        .ok_or_else(|| malformed(response, "diagnosis"))?;
    Ok(DiagnosisOutcome {
        diagnosis: diagnosis.to_owned(),
        suggested_fix: code_block(text, language).unwrap_or_default(),
        explanation: paragraphs.next().map(str::trim).unwrap_or_default().to_owned(),
        provider: response.provider.clone(),
    })
}

pub fn parse_generation(
    response: &ProviderResponse,
    language: &str,
) -> Result<GenerationOutcome, ProviderError> {
    let text = response.text.as_str();
    let (files, requested_main, explanation) = match json_object(text) {
        Some(object) if object.get("files").is_some_and(Value::is_array) => {
            let files: Vec<GeneratedFile> = object
                .get("files")
                .and_then(Value::as_array)
                .map(|files| files.iter().filter_map(generated_file).collect())
                .unwrap_or_default();
            (
                files,
                string_field(&object, "main_file"),
                string_field(&object, "explanation").unwrap_or_default(),
            )
        }
        _ => {
            let files: Vec<GeneratedFile> = code_block(text, language)
                .filter(|code| !code.trim().is_empty())
                .map(|content| GeneratedFile {
                    name: DEFAULT_MAIN_FILE.to_owned(),
                    content,
                    purpose: "Program entry point".to_owned(),
                })
                .into_iter()
                .collect();
            (files, None, prose_outside_blocks(text))
        }
    };

    if files.is_empty() {
        return Err(malformed(response, "usable files"));
    }
    let main_file = pick_main_file(&files, requested_main);
    Ok(GenerationOutcome {
        files,
        main_file,
        explanation,
        provider: response.provider.clone(),
    })
}

pub fn parse_review(response: &ProviderResponse) -> Result<ReviewOutcome, ProviderError> {
    let text = response.text.as_str();
    if let Some(object) = json_object(text) {
        let summary = string_field(&object, "summary").unwrap_or_default();
        let issues: Vec<ReviewIssue> = object
            .get("issues")
            .and_then(Value::as_array)
            .map(|issues| issues.iter().filter_map(review_issue).collect())
            .unwrap_or_default();
        let suggestions = string_list(&object, "suggestions");
        if !summary.is_empty() || !issues.is_empty() || !suggestions.is_empty() {
            return Ok(ReviewOutcome {
                summary,
                issues,
                suggestions,
                provider: response.provider.clone(),
            });
        }
    }

    // Free-form reply: bullets that name a defect are issues, the other
    // bullets are suggestions, and the remaining prose is the summary.
    let (summary, items) = split_list_items(&prose_outside_blocks(text));
    if summary.is_empty() && items.is_empty() {
        return Err(malformed(response, "review"));
    }
    let (issues, suggestions): (Vec<String>, Vec<String>) =
        items.into_iter().partition(|item| names_defect(item));
    Ok(ReviewOutcome {
        summary,
        issues: issues
            .into_iter()
            .map(|message| ReviewIssue {
                severity: severity_for(&message),
                message,
                line: None,
            })
            .collect(),
        suggestions,
        provider: response.provider.clone(),
    })
}

fn string_list(object: &Value, key: &str) -> Vec<String> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Accepts `{"message", "line", "severity"}` objects or bare strings.
fn review_issue(value: &Value) -> Option<ReviewIssue> {
    if let Some(message) = value.as_str().map(str::trim).filter(|m| !m.is_empty()) {
        return Some(ReviewIssue {
            severity: severity_for(message),
            message: message.to_owned(),
            line: None,
        });
    }
    let message = string_field(value, "message").filter(|m| !m.trim().is_empty())?;
    let severity = match value.get("severity").and_then(Value::as_str) {
        Some(label) => match label.trim().to_ascii_lowercase().as_str() {
            "error" => IssueSeverity::Error,
            "warning" => IssueSeverity::Warning,
            _ => IssueSeverity::Info,
        },
        None => severity_for(&message),
    };
    Some(ReviewIssue {
        line: value
            .get("line")
            .and_then(Value::as_u64)
            .and_then(|line| usize::try_from(line).ok())
            .filter(|line| *line > 0),
        severity,
        message,
    })
}

fn names_defect(text: &str) -> bool {
    let lower = text.to_lowercase();
    ISSUE_WORDS.iter().any(|word| lower.contains(word))
}

fn severity_for(message: &str) -> IssueSeverity {
    let lower = message.to_lowercase();
    if ["error", "overflow", "undefined", "crash"]
        .iter()
        .any(|word| lower.contains(word))
    {
        IssueSeverity::Error
    } else if names_defect(&lower) {
        IssueSeverity::Warning
    } else {
        IssueSeverity::Info
    }
}

fn generated_file(value: &Value) -> Option<GeneratedFile> {
    let name = string_field(value, "name")?;
    let content = value.get("content").and_then(Value::as_str)?.to_owned();
    if !is_safe_file_name(&name) {
        tracing::warn!(%name, "dropping generated file with unsafe name");
        return None;
    }
    Some(GeneratedFile {
        name,
        content,
        purpose: string_field(value, "purpose").unwrap_or_default(),
    })
}

/// Relative, forward-slash, no parent components.
fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && !name.contains(':')
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

fn pick_main_file(files: &[GeneratedFile], requested: Option<String>) -> Option<String> {
    let has = |name: &str| files.iter().any(|file| file.name == name);
    requested
        .filter(|name| has(name))
        .or_else(|| has(DEFAULT_MAIN_FILE).then(|| DEFAULT_MAIN_FILE.to_owned()))
        .or_else(|| {
            files
                .iter()
                .find(|file| file.name.ends_with(".c"))
                .map(|file| file.name.clone())
        })
}
