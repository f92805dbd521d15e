//! Deterministic, network-free adapter. Always last in the chain and never
//! fails: every action has a heuristic answer.
//!
//! Refactor, diagnosis and generation replies are JSON objects with the same
//! fields the runtime extracts from remote replies, so outcome parsing does
//! not need to special-case this adapter.

use std::sync::LazyLock;

use async_trait::async_trait;
use quill_protocol::{
    ActionSubject, IssueSeverity, ProviderAdapter, ProviderError, ProviderRequest,
    ProviderResponse, ReviewIssue, Suggestion, SuggestionKind,
};
use regex::{Captures, Regex};
use serde_json::json;
use tracing::{debug, instrument};

use crate::parse::confidence_for;

const MAX_COMPLETIONS: usize = 5;

const LIBRARY_FUNCTIONS: &[&str] = &[
    "printf", "scanf", "puts", "putchar", "getchar", "fgets", "fopen", "fclose", "fprintf",
    "malloc", "calloc", "realloc", "free", "exit", "atoi", "strlen", "strcpy", "strcmp", "strcat",
    "memcpy", "memset", "sqrt", "pow",
];
const KEYWORDS: &[&str] = &[
    "int", "char", "float", "double", "void", "long", "unsigned", "const", "static", "struct",
    "if", "else", "while", "for", "do", "switch", "case", "break", "continue", "return", "sizeof",
    "typedef",
];
const SNIPPETS: &[(&str, &str)] = &[
    ("for", "for (int i = 0; i < n; i++) {\n    \n}"),
    ("while", "while (condition) {\n    \n}"),
    ("if", "if (condition) {\n    \n}"),
    ("switch", "switch (value) {\ncase 0:\n    break;\ndefault:\n    break;\n}"),
    ("main", "int main(void) {\n    \n    return 0;\n}"),
];
const HEADERS: &[&str] = &["stdio.h", "stdlib.h", "string.h", "math.h", "stdbool.h", "ctype.h"];

#[derive(Debug, Clone, Default)]
pub struct LocalAdapter;

impl LocalAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn is_local(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(action = %request.action()))]
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let (text, suggestions) = match &request.prompt.subject {
            ActionSubject::Completion {
                line_prefix,
                known_functions,
                known_variables,
                ..
            } => {
                let suggestions = complete_locally(line_prefix, known_functions, known_variables);
                let text = suggestions
                    .iter()
                    .map(|suggestion| suggestion.insert_text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                (text, suggestions)
            }
            ActionSubject::Refactor { code, .. } => {
                let refactor = refactor_locally(code);
                let reply = json!({
                    "refactored_code": refactor.code,
                    "explanation": refactor.explanation,
                    "changes": refactor.changes,
                });
                (reply.to_string(), Vec::new())
            }
            ActionSubject::Diagnosis {
                error_message,
                code,
            } => {
                let diagnosis = diagnose_locally(error_message, code);
                let reply = json!({
                    "diagnosis": diagnosis.diagnosis,
                    "suggested_fix": diagnosis.suggested_fix,
                    "explanation": diagnosis.explanation,
                });
                (reply.to_string(), Vec::new())
            }
            ActionSubject::Generation { prompt } => (generate_locally(prompt).to_string(), Vec::new()),
            ActionSubject::Review { code, focus } => {
                let review = review_locally(code, focus);
                let reply = json!({
                    "summary": review.summary,
                    "issues": review.issues,
                    "suggestions": review.suggestions,
                });
                (reply.to_string(), Vec::new())
            }
        };
        debug!(chars = text.len(), suggestions = suggestions.len(), "local reply");

        Ok(ProviderResponse {
            provider: "local".to_owned(),
            raw: serde_json::Value::Null,
            text,
            suggestions,
        })
    }
}

/// Completion candidates for the identifier being typed at the cursor.
pub fn complete_locally(
    line_prefix: &str,
    known_functions: &[String],
    known_variables: &[String],
) -> Vec<Suggestion> {
    let fragment: String = {
        let reversed: String = line_prefix
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        reversed.chars().rev().collect()
    };
    let trimmed = line_prefix.trim();

    let mut candidates: Vec<(String, String, SuggestionKind)> = Vec::new();
    if trimmed.starts_with("#include") || trimmed.starts_with('#') {
        for header in HEADERS {
            candidates.push((
                (*header).to_owned(),
                format!("#include <{header}>"),
                SuggestionKind::Module,
            ));
        }
    } else if fragment.is_empty() {
        let after_open = trimmed.ends_with('(') || trimmed.ends_with(',');
        if after_open {
            for variable in known_variables {
                candidates.push((variable.clone(), variable.clone(), SuggestionKind::Variable));
            }
        } else if trimmed.is_empty() || trimmed.ends_with(['{', ';', '}']) {
            for function in known_functions.iter().filter(|name| name.as_str() != "main") {
                candidates.push((function.clone(), format!("{function}();"), SuggestionKind::Function));
            }
            for (label, body) in SNIPPETS.iter().take(3) {
                candidates.push(((*label).to_owned(), (*body).to_owned(), SuggestionKind::Snippet));
            }
        } else {
            for keyword in KEYWORDS.iter().take(MAX_COMPLETIONS) {
                candidates.push(((*keyword).to_owned(), (*keyword).to_owned(), SuggestionKind::Text));
            }
        }
    } else {
        let matches = |name: &str| name.starts_with(fragment.as_str()) && name != fragment;
        for function in known_functions.iter().filter(|name| matches(name)) {
            candidates.push((function.clone(), format!("{function}()"), SuggestionKind::Function));
        }
        for variable in known_variables.iter().filter(|name| matches(name)) {
            candidates.push((variable.clone(), variable.clone(), SuggestionKind::Variable));
        }
        for function in LIBRARY_FUNCTIONS.iter().filter(|name| matches(name)) {
            candidates.push(((*function).to_owned(), format!("{function}()"), SuggestionKind::Function));
        }
        for keyword in KEYWORDS.iter().filter(|name| matches(name)) {
            candidates.push(((*keyword).to_owned(), (*keyword).to_owned(), SuggestionKind::Text));
        }
        for (label, body) in SNIPPETS
            .iter()
            .filter(|(label, _)| label.starts_with(fragment.as_str()))
        {
            candidates.push(((*label).to_owned(), (*body).to_owned(), SuggestionKind::Snippet));
        }
    }

    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|(_, insert_text, _)| seen.insert(insert_text.clone()))
        .take(MAX_COMPLETIONS)
        .enumerate()
        .map(|(rank, (label, insert_text, kind))| Suggestion {
            label,
            insert_text,
            confidence: confidence_for(rank),
            kind,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRefactor {
    pub code: String,
    pub explanation: String,
    pub changes: Vec<String>,
}

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run pattern is valid"));
static KEYWORD_PAREN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(if|for|while|switch|return)\(").expect("keyword paren pattern is valid")
});
static COMMA_TIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\S)").expect("comma pattern is valid"));
static BRACE_NEXT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)[ \t]*\n[ \t]*\{").expect("brace pattern is valid"));
static BRACE_TIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\{").expect("tight brace pattern is valid"));
static MAIN_NO_PARAMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bint\s+main\s*\(\s*\)").expect("main signature pattern is valid")
});
static CONSTANT_PRINTF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bprintf\("([^%"\\]*)\\n"\);"#).expect("printf pattern is valid")
});

/// Formatting and small best-practice rewrites.
pub fn refactor_locally(code: &str) -> LocalRefactor {
    if code.trim().is_empty() {
        return LocalRefactor {
            code: code.to_owned(),
            explanation: "Nothing to refactor: the code is empty.".to_owned(),
            changes: Vec::new(),
        };
    }

    let mut changes = Vec::new();
    let mut current = code.to_owned();
    let mut step = |label: &str, next: String, current: &mut String| {
        if next != *current {
            changes.push(label.to_owned());
            *current = next;
        }
    };

    step("Normalized line endings to LF", current.replace("\r\n", "\n"), &mut current);
    step("Expanded tabs to four spaces", current.replace('\t', "    "), &mut current);
    step(
        "Removed trailing whitespace",
        current
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            + if current.ends_with('\n') { "\n" } else { "" },
        &mut current,
    );
    step(
        "Collapsed runs of blank lines",
        BLANK_RUNS.replace_all(&current, "\n\n").into_owned(),
        &mut current,
    );
    step(
        "Added a space between control keywords and parentheses",
        map_code_segments(&current, |segment| {
            KEYWORD_PAREN.replace_all(segment, "$1 (").into_owned()
        }),
        &mut current,
    );
    step(
        "Added a space after commas",
        map_code_segments(&current, |segment| {
            COMMA_TIGHT.replace_all(segment, ", $1").into_owned()
        }),
        &mut current,
    );
    step(
        "Placed opening braces on the statement line",
        map_code_segments(&current, |segment| {
            let joined = BRACE_NEXT_LINE.replace_all(segment, ") {");
            BRACE_TIGHT.replace_all(&joined, ") {").into_owned()
        }),
        &mut current,
    );
    step(
        "Declared main with an explicit void parameter list",
        MAIN_NO_PARAMS.replace_all(&current, "int main(void)").into_owned(),
        &mut current,
    );
    if current.contains("#include <stdio.h>") {
        step(
            "Replaced constant printf calls with puts",
            CONSTANT_PRINTF
                .replace_all(&current, |caps: &Captures<'_>| format!("puts(\"{}\");", &caps[1]))
                .into_owned(),
            &mut current,
        );
    }

    let explanation = if changes.is_empty() {
        "The code already follows the local formatting rules.".to_owned()
    } else {
        format!(
            "Applied {} local formatting and best-practice fixes.",
            changes.len()
        )
    };
    LocalRefactor {
        code: current,
        explanation,
        changes,
    }
}

/// Apply `transform` only to code, leaving string literals, character
/// literals and comments untouched.
fn map_code_segments(source: &str, transform: impl Fn(&str) -> String) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Code,
        Str,
        Char,
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(source.len());
    let mut code = String::new();
    let mut mode = Mode::Code;
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Code => {
                let opens = match (ch, chars.peek()) {
                    ('"', _) => Some(Mode::Str),
                    ('\'', _) => Some(Mode::Char),
                    ('/', Some('/')) => Some(Mode::LineComment),
                    ('/', Some('*')) => Some(Mode::BlockComment),
                    _ => None,
                };
                match opens {
                    Some(next) => {
                        out.push_str(&transform(&code));
                        code.clear();
                        out.push(ch);
                        if matches!(next, Mode::LineComment | Mode::BlockComment)
                            && let Some(second) = chars.next()
                        {
                            out.push(second);
                        }
                        mode = next;
                    }
                    None => code.push(ch),
                }
            }
            Mode::Str | Mode::Char => {
                out.push(ch);
                let quote = if mode == Mode::Str { '"' } else { '\'' };
                if ch == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == quote || ch == '\n' {
                    mode = Mode::Code;
                }
            }
            Mode::LineComment => {
                if ch == '\n' {
                    mode = Mode::Code;
                    code.push(ch);
                } else {
                    out.push(ch);
                }
            }
            Mode::BlockComment => {
                out.push(ch);
                if ch == '*' && chars.peek() == Some(&'/') {
                    if let Some(slash) = chars.next() {
                        out.push(slash);
                    }
                    mode = Mode::Code;
                }
            }
        }
    }
    out.push_str(&transform(&code));
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDiagnosis {
    pub diagnosis: String,
    pub suggested_fix: String,
    pub explanation: String,
}

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+):(?:\d+:)?").expect("location pattern is valid"));
static QUOTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[‘'`](\w+)[’']").expect("quoted name pattern is valid"));

/// Pattern table over common compiler messages.
pub fn diagnose_locally(error_message: &str, code: &str) -> LocalDiagnosis {
    let lower = error_message.to_lowercase();
    let name = QUOTED_NAME
        .captures(error_message)
        .map(|caps| caps[1].to_owned());
    let line = LOCATION
        .captures(error_message)
        .and_then(|caps| caps[1].parse::<usize>().ok());

    if lower.contains("expected ';'") || lower.contains("expected ‘;’") || lower.contains("missing semicolon") {
        let fixed = line.and_then(|line| insert_semicolon(code, line));
        return LocalDiagnosis {
            diagnosis: "A statement is missing its terminating semicolon.".to_owned(),
            suggested_fix: fixed.unwrap_or_else(|| {
                "Add `;` at the end of the statement before the reported location.".to_owned()
            }),
            explanation: "Every C statement ends with `;`. The compiler reports the error at the \
                          token after the missing semicolon, usually on the next line."
                .to_owned(),
        };
    }

    if lower.contains("implicit declaration") {
        let function = name.unwrap_or_else(|| "the function".to_owned());
        let header = header_for(&function);
        let suggested_fix = match header {
            Some(header) if !code.contains(&format!("<{header}>")) => {
                format!("#include <{header}>\n{code}")
            }
            _ => format!("Declare a prototype for `{function}` before its first use."),
        };
        return LocalDiagnosis {
            diagnosis: format!("`{function}` is called before it is declared."),
            suggested_fix,
            explanation: match header {
                Some(header) => format!("`{function}` is declared in <{header}>, which must be included."),
                None => "C requires a declaration or prototype before a function is called."
                    .to_owned(),
            },
        };
    }

    if lower.contains("undeclared") {
        let variable = name.unwrap_or_else(|| "an identifier".to_owned());
        return LocalDiagnosis {
            diagnosis: format!("Undeclared variable or function: {variable}."),
            suggested_fix: format!(
                "Declare `{variable}` before use (for example `int {variable} = 0;`) or check its spelling."
            ),
            explanation: "Every variable must be declared in scope before it is used.".to_owned(),
        };
    }

    if lower.contains("undefined reference") {
        let symbol = name.unwrap_or_else(|| "a symbol".to_owned());
        return LocalDiagnosis {
            diagnosis: format!("{symbol} is referenced but never defined."),
            suggested_fix: format!(
                "Implement `{symbol}` or link the object file or library that defines it, and check the spelling."
            ),
            explanation: "The linker found a declaration but no definition.".to_owned(),
        };
    }

    if lower.contains("incompatible")
        || lower.contains("makes integer from pointer")
        || lower.contains("makes pointer from integer")
        || lower.contains("type mismatch")
    {
        return LocalDiagnosis {
            diagnosis: "A value is used with an incompatible type.".to_owned(),
            suggested_fix: "Make the declared type match the value, or add an explicit cast where the conversion is intended.".to_owned(),
            explanation: "C converts between some types silently, but pointers and integers, or mismatched pointer types, need matching declarations.".to_owned(),
        };
    }

    if lower.contains("syntax error") || lower.contains("expected") {
        return LocalDiagnosis {
            diagnosis: "Syntax error detected in the code.".to_owned(),
            suggested_fix: "Check for missing semicolons, brackets, or parentheses near the reported line.".to_owned(),
            explanation: "The parser met a token it did not expect at this point.".to_owned(),
        };
    }

    LocalDiagnosis {
        diagnosis: "Unable to analyze the error automatically.".to_owned(),
        suggested_fix: "Please check the syntax around the reported location and try again.".to_owned(),
        explanation: "Basic error analysis performed.".to_owned(),
    }
}

fn header_for(function: &str) -> Option<&'static str> {
    match function {
        "printf" | "scanf" | "puts" | "putchar" | "getchar" | "fgets" | "fopen" | "fclose"
        | "fprintf" => Some("stdio.h"),
        "malloc" | "calloc" | "realloc" | "free" | "exit" | "atoi" | "abs" => Some("stdlib.h"),
        "strlen" | "strcpy" | "strcmp" | "strcat" | "memcpy" | "memset" => Some("string.h"),
        "sqrt" | "pow" | "sin" | "cos" | "fabs" => Some("math.h"),
        _ => None,
    }
}

/// Append `;` to the statement the compiler most likely means: the nearest
/// non-blank line before `reported`, or the reported line itself.
fn insert_semicolon(code: &str, reported: usize) -> Option<String> {
    let mut lines: Vec<String> = code.lines().map(str::to_owned).collect();
    let reported_index = reported.checked_sub(1).filter(|index| *index < lines.len())?;
    let needs_semicolon = |line: &str| {
        let trimmed = line.trim_end();
        !trimmed.trim().is_empty() && !trimmed.ends_with([';', '{', '}']) && !trimmed.trim_start().starts_with('#')
    };
    let target = (0..reported_index)
        .rev()
        .find(|index| !lines[*index].trim().is_empty())
        .filter(|index| needs_semicolon(&lines[*index]))
        .or_else(|| needs_semicolon(&lines[reported_index]).then_some(reported_index))?;
    let line = &mut lines[target];
    let trimmed_len = line.trim_end().len();
    line.truncate(trimmed_len);
    line.push(';');
    let mut fixed = lines.join("\n");
    if code.ends_with('\n') {
        fixed.push('\n');
    }
    Some(fixed)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalReview {
    pub summary: String,
    pub issues: Vec<ReviewIssue>,
    pub suggestions: Vec<String>,
}

const LONG_LINE: usize = 100;

static GETS_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgets\s*\(").expect("gets pattern is valid"));
static SCANF_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bscanf\s*\(\s*"[^"]*%s"#).expect("scanf pattern is valid"));
static UNBOUNDED_COPY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(strcpy|strcat|sprintf)\s*\(").expect("copy pattern is valid"));
static VARIABLE_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bprintf\s*\(\s*[A-Za-z_]\w*\s*\)").expect("format pattern is valid")
});
static ALLOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(malloc|calloc|realloc)\s*\(").expect("allocation pattern is valid"));
static FREE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfree\s*\(").expect("free pattern is valid"));
static MARKER_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(TODO|FIXME|XXX)\b").expect("marker pattern is valid"));

/// Line-based checks for common C hazards.
pub fn review_locally(code: &str, focus: &[String]) -> LocalReview {
    if code.trim().is_empty() {
        return LocalReview {
            summary: "Nothing to review: the code is empty.".to_owned(),
            issues: Vec::new(),
            suggestions: Vec::new(),
        };
    }

    let mut issues = Vec::new();
    let mut suggestions: Vec<String> = Vec::new();
    let mut suggest = |text: &str| {
        if !suggestions.iter().any(|existing| existing == text) {
            suggestions.push(text.to_owned());
        }
    };
    let mut first_allocation = None;

    for (index, line) in code.lines().enumerate() {
        let number = index + 1;
        let mut issue = |severity: IssueSeverity, message: String| {
            issues.push(ReviewIssue {
                message,
                line: Some(number),
                severity,
            });
        };
        if GETS_CALL.is_match(line) {
            issue(
                IssueSeverity::Error,
                "gets() cannot limit its input and can overflow the buffer".to_owned(),
            );
            suggest("Read lines with fgets(buffer, sizeof buffer, stdin).");
        }
        if SCANF_STRING.is_match(line) {
            issue(
                IssueSeverity::Warning,
                "scanf with %s has no field width and can overflow the buffer".to_owned(),
            );
            suggest("Give %s a field width one less than the buffer size, e.g. %63s.");
        }
        if let Some(caps) = UNBOUNDED_COPY.captures(line) {
            issue(
                IssueSeverity::Warning,
                format!("{}() does not check the destination size", &caps[1]),
            );
            suggest("Prefer snprintf or check lengths before copying strings.");
        }
        if VARIABLE_FORMAT.is_match(line) {
            issue(
                IssueSeverity::Warning,
                "printf is called with a non-literal format string".to_owned(),
            );
            suggest("Print untrusted text with printf(\"%s\", text) or puts.");
        }
        if ALLOCATION.is_match(line) && first_allocation.is_none() {
            first_allocation = Some(number);
        }
        if MARKER_COMMENT.is_match(line) {
            issue(IssueSeverity::Info, "unfinished work is marked in a comment".to_owned());
        }
        if line.chars().count() > LONG_LINE {
            issue(
                IssueSeverity::Info,
                format!("line is longer than {LONG_LINE} characters"),
            );
            suggest("Wrap long lines to keep the code readable.");
        }
    }

    if let Some(line) = first_allocation
        && !FREE_CALL.is_match(code)
    {
        issues.push(ReviewIssue {
            message: "memory is allocated but never freed, which leaks it".to_owned(),
            line: Some(line),
            severity: IssueSeverity::Warning,
        });
        suggest("Release every allocation with free() once it is no longer needed.");
    }

    let mut summary = match issues.len() {
        0 => "No problems found by the local checks.".to_owned(),
        1 => "The local checks found 1 issue.".to_owned(),
        count => format!("The local checks found {count} issues."),
    };
    let focus: Vec<&str> = focus
        .iter()
        .map(|area| area.trim())
        .filter(|area| !area.is_empty())
        .collect();
    if !focus.is_empty() {
        summary.push_str(&format!(" Requested focus: {}.", focus.join(", ")));
    }
    LocalReview {
        summary,
        issues,
        suggestions,
    }
}

const HELLO_WORLD: &str = "#include <stdio.h>\n\nint main(void) {\n    printf(\"Hello, World!\\n\");\n    return 0;\n}\n";

const CALCULATOR: &str = r#"#include <stdio.h>

int main(void) {
    int a, b, result;
    char operation;

    printf("Enter first number: ");
    scanf("%d", &a);

    printf("Enter operation (+, -, *, /): ");
    scanf(" %c", &operation);

    printf("Enter second number: ");
    scanf("%d", &b);

    switch (operation) {
        case '+':
            result = a + b;
            break;
        case '-':
            result = a - b;
            break;
        case '*':
            result = a * b;
            break;
        case '/':
            if (b == 0) {
                printf("Error: Division by zero!\n");
                return 1;
            }
            result = a / b;
            break;
        default:
            printf("Error: Invalid operation!\n");
            return 1;
    }

    printf("Result: %d\n", result);
    return 0;
}
"#;

/// Template project as a generation manifest.
pub fn generate_locally(prompt: &str) -> serde_json::Value {
    let (content, purpose, explanation) = if prompt.to_lowercase().contains("calculator") {
        (
            CALCULATOR,
            "Interactive integer calculator",
            "Generated a calculator template that reads two integers and an operator.",
        )
    } else {
        (
            HELLO_WORLD,
            "Program entry point",
            "Generated a minimal hello-world template; refine the request or enable a remote provider for more.",
        )
    };
    json!({
        "files": [{ "name": "main.c", "content": content, "purpose": purpose }],
        "main_file": "main.c",
        "explanation": explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_action, completion_request, request_for};
    use anyhow::Result;
    use quill_protocol::ActionKind;

    #[tokio::test]
    async fn local_adapter_answers_every_action() -> Result<()> {
        let adapter = LocalAdapter::new();
        let subjects = [
            ActionSubject::Refactor {
                code: "int main(){\n\tif(x){return 0;}\n}".to_owned(),
                intent: String::new(),
            },
            ActionSubject::Diagnosis {
                error_message: "main.c:3:5: error: 'x' undeclared".to_owned(),
                code: "int main() { x = 1; }".to_owned(),
            },
            ActionSubject::Generation {
                prompt: "a calculator".to_owned(),
            },
            ActionSubject::Review {
                code: String::new(),
                focus: Vec::new(),
            },
        ];
        for subject in subjects {
            let request = request_for(subject);
            let response = adapter.complete(&request).await?;
            assert_eq!(response.provider, "local");
            let reply: serde_json::Value = serde_json::from_str(&response.text)?;
            assert!(reply.is_object());
        }

        let request = completion_request();
        assert_action(&request, ActionKind::Completion);
        let response = adapter.complete(&request).await?;
        assert!(!response.suggestions.is_empty());
        Ok(())
    }

    #[test]
    fn completion_prefers_project_symbols() {
        let suggestions = complete_locally(
            "    pri",
            &["print_total".to_owned(), "main".to_owned()],
            &["price".to_owned()],
        );
        let labels: Vec<_> = suggestions.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["print_total", "price", "printf"]);
        assert_eq!(suggestions[0].kind, SuggestionKind::Function);
        assert_eq!(suggestions[0].insert_text, "print_total()");
        assert!(suggestions.windows(2).all(|w| w[0].confidence > w[1].confidence));
    }

    #[test]
    fn completion_after_include_offers_headers() {
        let suggestions = complete_locally("#include ", &[], &[]);
        assert_eq!(suggestions[0].insert_text, "#include <stdio.h>");
        assert!(suggestions.iter().all(|s| s.kind == SuggestionKind::Module));
    }

    #[test]
    fn refactor_applies_formatting_rules() {
        let source = "#include <stdio.h>\r\nint main()\r\n{\r\n\tif(a,b){\r\n\t\tprintf(\"done\\n\");\r\n\t}\r\n\r\n\r\n\r\n\treturn 0;\r\n}\r\n";
        let refactor = refactor_locally(source);
        assert_eq!(
            refactor.code,
            "#include <stdio.h>\nint main(void) {\n    if (a, b) {\n        puts(\"done\");\n    }\n\n    return 0;\n}\n"
        );
        assert!(refactor.changes.contains(&"Expanded tabs to four spaces".to_owned()));
        assert!(refactor.changes.contains(&"Normalized line endings to LF".to_owned()));
    }

    #[test]
    fn refactor_leaves_literals_and_comments_alone() {
        let source = "char *s = \"a,b\"; // if(x),y\nint f(int a,int b);\n";
        let refactor = refactor_locally(source);
        assert_eq!(
            refactor.code,
            "char *s = \"a,b\"; // if(x),y\nint f(int a, int b);\n"
        );
    }

    #[test]
    fn empty_refactor_is_a_no_op() {
        let refactor = refactor_locally("   ");
        assert!(refactor.changes.is_empty());
        assert_eq!(refactor.code, "   ");
    }

    #[test]
    fn review_flags_unsafe_input_and_leaks() {
        let code = "#include <stdio.h>\n#include <stdlib.h>\nint main(void) {\n    char name[16];\n    gets(name);\n    char *copy = malloc(16);\n    strcpy(copy, name);\n    printf(name);\n    return 0;\n}\n";
        let review = review_locally(code, &["memory".to_owned()]);
        let found: Vec<_> = review
            .issues
            .iter()
            .map(|issue| (issue.line, issue.severity))
            .collect();
        assert_eq!(
            found,
            vec![
                (Some(5), IssueSeverity::Error),
                (Some(7), IssueSeverity::Warning),
                (Some(8), IssueSeverity::Warning),
                (Some(6), IssueSeverity::Warning),
            ]
        );
        assert!(review.summary.starts_with("The local checks found 4 issues."));
        assert!(review.summary.ends_with("Requested focus: memory."));
        assert_eq!(review.suggestions.len(), 4);
    }

    #[test]
    fn clean_code_reviews_without_issues() {
        let review = review_locally("int add(int a, int b) {\n    return a + b;\n}\n", &[]);
        assert!(review.issues.is_empty());
        assert_eq!(review.summary, "No problems found by the local checks.");
    }

    #[test]
    fn diagnosis_table_covers_common_errors() {
        let undeclared = diagnose_locally("main.c:4:5: error: ‘count’ undeclared (first use in this function)", "");
        assert!(undeclared.diagnosis.contains("count"));

        let undefined = diagnose_locally("undefined reference to `compute'", "");
        assert!(undefined.suggested_fix.contains("compute"));

        let implicit = diagnose_locally(
            "main.c:2:5: warning: implicit declaration of function 'printf'",
            "int main() {\n    printf(\"hi\");\n}\n",
        );
        assert!(implicit.suggested_fix.starts_with("#include <stdio.h>\n"));

        let syntax = diagnose_locally("syntax error near '}'", "");
        assert_eq!(syntax.diagnosis, "Syntax error detected in the code.");

        let unknown = diagnose_locally("segmentation fault", "");
        assert!(unknown.diagnosis.starts_with("Unable"));
    }

    #[test]
    fn missing_semicolon_is_fixed_on_previous_line() {
        let code = "int main() {\n    int x = 1\n    return x;\n}\n";
        let diagnosis = diagnose_locally("main.c:3:5: error: expected ';' before 'return'", code);
        assert_eq!(
            diagnosis.suggested_fix,
            "int main() {\n    int x = 1;\n    return x;\n}\n"
        );
    }

    #[test]
    fn generation_picks_template_from_prompt() {
        let calculator = generate_locally("Build a CALCULATOR");
        assert!(calculator["files"][0]["content"].as_str().unwrap_or_default().contains("switch (operation)"));
        let hello = generate_locally("anything");
        assert_eq!(hello["main_file"], "main.c");
        assert!(hello["files"][0]["content"].as_str().unwrap_or_default().contains("Hello, World!"));
    }
}
