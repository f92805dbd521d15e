//! Prompt construction.
//!
//! [`PromptContextBuilder`] turns an [`ActionRequest`] plus an owned
//! [`AiContextSnapshot`] into a [`PromptPayload`] that fits a character
//! budget. The output is a pure function of its inputs: identical requests
//! and snapshots always render identical prompts.
//!
//! When the rendered prompt is over budget, optional sections are dropped
//! in a fixed order:
//!
//! 1. recent interactions, oldest first
//! 2. cross-file signatures, last first
//! 3. nearby source lines, farthest from the cursor first (the line above
//!    wins a tie)
//! 4. finally the action body is cut and marked `[truncated]`

mod templates;

use quill_protocol::{
    ActionKind, ActionRequest, ActionSubject, AiContextSnapshot, AiInteraction, CursorPosition,
    PromptPayload,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use templates::{fence_tag, system_prompt};

pub const TRUNCATION_MARKER: &str = "\n[truncated]";
const EXCERPT_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Language label used in instructions and code fences.
    pub language: String,
    /// Lines kept on each side of the cursor.
    pub window_lines: usize,
    /// Upper bound on `system` + `user`, in characters.
    pub budget_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            language: "C".to_owned(),
            window_lines: 10,
            budget_chars: 6000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptContextBuilder {
    config: ContextConfig,
}

impl PromptContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn build(&self, request: &ActionRequest, snapshot: &AiContextSnapshot) -> PromptPayload {
        let action = request.kind();
        let system = system_prompt(action, &self.config.language);
        let cursor = match request {
            ActionRequest::Completion { cursor, .. } => *cursor,
            _ => snapshot.context.cursor,
        };

        let mut sections = Sections {
            header: self.header(action, cursor, snapshot),
            body: self.body(request, cursor, snapshot),
            window: self.window(cursor, snapshot),
            window_path: snapshot
                .current_file
                .as_ref()
                .map(|file| file.path.clone())
                .unwrap_or_default(),
            cursor_line: cursor.line,
            signatures: signatures(snapshot),
            interactions: snapshot
                .recent_interactions
                .iter()
                .map(interaction_line)
                .collect(),
        };

        let budget = self
            .config
            .budget_chars
            .saturating_sub(system.chars().count());
        let dropped = sections.fit(budget);
        let user = sections.render_bounded(budget);
        debug!(
            action = %action,
            chars = user.chars().count(),
            dropped,
            "built prompt"
        );

        PromptPayload {
            action,
            system,
            user,
            subject: self.subject(request, cursor, snapshot, &sections.window),
        }
    }

    fn header(&self, action: ActionKind, cursor: CursorPosition, snapshot: &AiContextSnapshot) -> String {
        let file = snapshot
            .current_file
            .as_ref()
            .map(|file| file.path.as_str())
            .unwrap_or("(no file open)");
        let mut header = format!(
            "Project: {}\nFile: {file}\nAction: {action}",
            snapshot.project.name
        );
        if action == ActionKind::Completion || snapshot.current_file.is_some() {
            header.push_str(&format!(
                "\nCursor: line {}, column {}",
                cursor.line, cursor.column
            ));
        }
        let imports = snapshot.imports();
        if !imports.is_empty() {
            header.push_str(&format!("\nIncludes: {}", imports.join(", ")));
        }
        header
    }

    fn body(&self, request: &ActionRequest, cursor: CursorPosition, snapshot: &AiContextSnapshot) -> String {
        let fence = fence_tag(&self.config.language);
        match request {
            ActionRequest::Completion { selection, .. } => {
                let mut body = format!(
                    "Complete the code at the cursor.\nCurrent line: {}",
                    line_prefix(snapshot, cursor)
                );
                if !selection.is_empty() {
                    body.push_str(&format!("\nSelected text:\n{selection}"));
                }
                body
            }
            ActionRequest::Refactor { code, intent } => {
                let goal = if intent.trim().is_empty() {
                    "improve readability and structure"
                } else {
                    intent.trim()
                };
                format!("Refactor this code ({goal}):\n```{fence}\n{code}\n```")
            }
            ActionRequest::Diagnosis { error_message, code } => format!(
                "Compiler error:\n{error_message}\n\nCode:\n```{fence}\n{code}\n```"
            ),
            ActionRequest::Generation { prompt } => format!("Generate a project for:\n{prompt}"),
            ActionRequest::Review { code, focus } => {
                let focus = focus
                    .iter()
                    .map(|area| area.trim())
                    .filter(|area| !area.is_empty())
                    .collect::<Vec<_>>();
                let mut body = "Review this code".to_owned();
                if !focus.is_empty() {
                    body.push_str(&format!(", focusing on {}", focus.join(", ")));
                }
                body.push_str(&format!(":\n```{fence}\n{code}\n```"));
                body
            }
        }
    }

    fn window(&self, cursor: CursorPosition, snapshot: &AiContextSnapshot) -> Vec<(usize, String)> {
        let Some(file) = snapshot.current_file.as_ref() else {
            return Vec::new();
        };
        let cursor_line = cursor.line.max(1);
        let first = cursor_line.saturating_sub(self.config.window_lines).max(1);
        let last = cursor_line + self.config.window_lines;
        file.content
            .lines()
            .enumerate()
            .map(|(offset, text)| (offset + 1, text))
            .filter(|(line, _)| *line >= first && *line <= last)
            .map(|(line, text)| (line, text.to_owned()))
            .collect()
    }

    fn subject(
        &self,
        request: &ActionRequest,
        cursor: CursorPosition,
        snapshot: &AiContextSnapshot,
        window: &[(usize, String)],
    ) -> ActionSubject {
        match request {
            ActionRequest::Completion { selection, .. } => ActionSubject::Completion {
                file: snapshot.current_file.as_ref().map(|file| file.path.clone()),
                cursor,
                selection: selection.clone(),
                line_prefix: line_prefix(snapshot, cursor),
                surrounding: window
                    .iter()
                    .map(|(_, text)| text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
                known_functions: snapshot.known_functions(),
                known_variables: snapshot.known_variables(),
            },
            ActionRequest::Refactor { code, intent } => ActionSubject::Refactor {
                code: code.clone(),
                intent: intent.clone(),
            },
            ActionRequest::Diagnosis { error_message, code } => ActionSubject::Diagnosis {
                error_message: error_message.clone(),
                code: code.clone(),
            },
            ActionRequest::Generation { prompt } => ActionSubject::Generation {
                prompt: prompt.clone(),
            },
            ActionRequest::Review { code, focus } => ActionSubject::Review {
                code: code.clone(),
                focus: focus.clone(),
            },
        }
    }
}

/// Text of the cursor line up to the (1-based) cursor column.
fn line_prefix(snapshot: &AiContextSnapshot, cursor: CursorPosition) -> String {
    snapshot
        .current_file
        .as_ref()
        .and_then(|file| file.content.lines().nth(cursor.line.saturating_sub(1)))
        .map(|line| line.chars().take(cursor.column.saturating_sub(1)).collect())
        .unwrap_or_default()
}

fn signatures(snapshot: &AiContextSnapshot) -> Vec<String> {
    let current = snapshot.current_file.as_ref().map(|file| file.path.as_str());
    let ordered = current
        .and_then(|path| snapshot.index.get_key_value(path))
        .into_iter()
        .chain(
            snapshot
                .index
                .iter()
                .filter(|(path, _)| Some(path.as_str()) != current),
        );
    ordered
        .flat_map(|(path, facts)| {
            facts.functions.iter().map(move |function| {
                format!(
                    "{} {}() at {path}:{}",
                    function.return_type, function.name, function.line
                )
            })
        })
        .collect()
}

fn interaction_line(interaction: &AiInteraction) -> String {
    format!(
        "[{}] {} => {}",
        interaction.kind,
        excerpt(&interaction.prompt),
        excerpt(&interaction.response)
    )
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        flat
    } else {
        let mut cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

struct Sections {
    header: String,
    body: String,
    window: Vec<(usize, String)>,
    window_path: String,
    cursor_line: usize,
    signatures: Vec<String>,
    /// Oldest first.
    interactions: Vec<String>,
}

impl Sections {
    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.header);
        out.push_str("\n\n");
        out.push_str(&self.body);
        if !self.window.is_empty() {
            out.push_str(&format!("\n\nNearby code ({}):", self.window_path));
            for (line, text) in &self.window {
                out.push_str(&format!("\n{line:>4} | {text}"));
            }
        }
        if !self.signatures.is_empty() {
            out.push_str("\n\nProject functions:");
            for signature in &self.signatures {
                out.push_str("\n- ");
                out.push_str(signature);
            }
        }
        if !self.interactions.is_empty() {
            out.push_str("\n\nRecent assistance:");
            for interaction in &self.interactions {
                out.push_str("\n- ");
                out.push_str(interaction);
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.render().chars().count()
    }

    /// Drop optional material until the render fits. Returns how many items
    /// were dropped.
    fn fit(&mut self, budget: usize) -> usize {
        let mut dropped = 0;
        while self.len() > budget && !self.interactions.is_empty() {
            self.interactions.remove(0);
            dropped += 1;
        }
        while self.len() > budget && self.signatures.pop().is_some() {
            dropped += 1;
        }
        while self.len() > budget && !self.window.is_empty() {
            let farthest = self.farthest_window_line();
            self.window.remove(farthest);
            dropped += 1;
        }
        dropped
    }

    fn farthest_window_line(&self) -> usize {
        let cursor = self.cursor_line;
        self.window
            .iter()
            .enumerate()
            .max_by_key(|(_, (line, _))| {
                // Equal distance: the line above the cursor sorts higher.
                (line.abs_diff(cursor), *line < cursor)
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Render, cutting the body (then, as a last resort, the whole text) so
    /// the result never exceeds `budget` characters.
    fn render_bounded(&mut self, budget: usize) -> String {
        let overflow = self.len().saturating_sub(budget);
        if overflow == 0 {
            return self.render();
        }
        let marker = TRUNCATION_MARKER.chars().count();
        let keep = self
            .body
            .chars()
            .count()
            .saturating_sub(overflow + marker);
        let mut body: String = self.body.chars().take(keep).collect();
        body.push_str(TRUNCATION_MARKER);
        self.body = body;

        let rendered = self.render();
        if rendered.chars().count() <= budget {
            rendered
        } else {
            rendered.chars().take(budget).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use indexmap::IndexMap;
    use quill_protocol::{
        CurrentFile, EditingContext, FileFacts, FunctionFact, ImportFact, Project, ProjectId,
    };
    use std::path::PathBuf;

    fn fixed_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().unwrap_or_default()
    }

    fn snapshot_with(content: &str, interactions: usize) -> AiContextSnapshot {
        let main_facts = FileFacts {
            functions: vec![FunctionFact {
                return_type: "int".to_owned(),
                name: "main".to_owned(),
                line: 3,
            }],
            variables: Vec::new(),
            imports: vec![ImportFact {
                header: "stdio.h".to_owned(),
                line: 1,
            }],
        };
        let calc_facts = FileFacts {
            functions: vec![FunctionFact {
                return_type: "int".to_owned(),
                name: "add".to_owned(),
                line: 1,
            }],
            ..FileFacts::default()
        };
        let mut index = IndexMap::new();
        index.insert("calc.c".to_owned(), calc_facts);
        index.insert("main.c".to_owned(), main_facts.clone());

        AiContextSnapshot {
            project: Project {
                id: ProjectId::from_string("p"),
                name: "calculator".to_owned(),
                root: PathBuf::from("/work/calculator"),
                created_at: fixed_time(),
                last_modified: fixed_time(),
            },
            context: EditingContext {
                current_file: Some("main.c".to_owned()),
                ..EditingContext::default()
            },
            current_file: Some(CurrentFile {
                path: "main.c".to_owned(),
                content: content.to_owned(),
                facts: main_facts,
            }),
            recent_history: Vec::new(),
            recent_interactions: (0..interactions)
                .map(|i| AiInteraction {
                    kind: ActionKind::Refactor,
                    prompt: format!("prompt number {i} {}", "p".repeat(60)),
                    response: format!("response number {i} {}", "r".repeat(60)),
                    metadata: IndexMap::new(),
                    timestamp: fixed_time(),
                })
                .collect(),
            files: index.keys().cloned().collect(),
            index,
        }
    }

    fn numbered_source(lines: usize) -> String {
        (1..=lines)
            .map(|n| format!("    int value_{n} = {n};"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn completion_prompt_has_window_signatures_and_subject() {
        let snapshot = snapshot_with("#include <stdio.h>\n\nint main() {\n    pri\n}\n", 1);
        let request = ActionRequest::Completion {
            cursor: CursorPosition::new(4, 8),
            selection: String::new(),
        };
        let payload = PromptContextBuilder::default().build(&request, &snapshot);

        assert_eq!(payload.action, ActionKind::Completion);
        assert!(payload.user.contains("Cursor: line 4, column 8"));
        assert!(payload.user.contains("   4 |     pri"));
        assert!(payload.user.contains("Includes: stdio.h"));
        let main_at = payload.user.find("int main() at main.c:3");
        let add_at = payload.user.find("int add() at calc.c:1");
        assert!(main_at.is_some() && add_at.is_some() && main_at < add_at);

        match payload.subject {
            ActionSubject::Completion {
                line_prefix,
                known_functions,
                ..
            } => {
                assert_eq!(line_prefix, "    pri");
                assert_eq!(known_functions, vec!["main".to_owned(), "add".to_owned()]);
            }
            other => panic!("unexpected subject {other:?}"),
        }
    }

    #[test]
    fn identical_inputs_render_identically() {
        let snapshot = snapshot_with(&numbered_source(80), 5);
        let request = ActionRequest::Completion {
            cursor: CursorPosition::new(40, 3),
            selection: "value".to_owned(),
        };
        let builder = PromptContextBuilder::new(ContextConfig {
            budget_chars: 1500,
            ..ContextConfig::default()
        });
        assert_eq!(builder.build(&request, &snapshot), builder.build(&request, &snapshot));
    }

    #[test]
    fn truncation_respects_budget_and_drop_order() {
        let snapshot = snapshot_with(&numbered_source(80), 5);
        let request = ActionRequest::Completion {
            cursor: CursorPosition::new(40, 3),
            selection: String::new(),
        };
        let config = ContextConfig {
            budget_chars: 1000,
            ..ContextConfig::default()
        };
        let payload = PromptContextBuilder::new(config.clone()).build(&request, &snapshot);

        assert!(payload.char_len() <= config.budget_chars);
        assert!(!payload.user.contains("Recent assistance"));
        // Cursor line survives longest.
        assert!(payload.user.contains("  40 |     int value_40 = 40;"));
        // Farthest lines go first, the one above before the one below.
        assert!(!payload.user.contains("  30 |"));
    }

    #[test]
    fn oldest_interactions_are_dropped_first() {
        let snapshot = snapshot_with("int main() {\n}\n", 5);
        let request = ActionRequest::Generation {
            prompt: "calculator".to_owned(),
        };
        let full = PromptContextBuilder::default().build(&request, &snapshot);
        let budget = full.char_len() - 50;
        let payload = PromptContextBuilder::new(ContextConfig {
            budget_chars: budget,
            ..ContextConfig::default()
        })
        .build(&request, &snapshot);

        assert!(payload.char_len() <= budget);
        assert!(!payload.user.contains("prompt number 0"));
        assert!(payload.user.contains("prompt number 4"));
    }

    #[test]
    fn oversized_body_is_marked_truncated() {
        let snapshot = snapshot_with("", 0);
        let code = "x".repeat(5000);
        let request = ActionRequest::Refactor {
            code,
            intent: String::new(),
        };
        let config = ContextConfig {
            budget_chars: 2000,
            ..ContextConfig::default()
        };
        let payload = PromptContextBuilder::new(config.clone()).build(&request, &snapshot);
        assert!(payload.char_len() <= config.budget_chars);
        assert!(payload.user.ends_with("[truncated]"));
        match payload.subject {
            ActionSubject::Refactor { code, .. } => assert_eq!(code.len(), 5000),
            other => panic!("unexpected subject {other:?}"),
        }
    }

    #[test]
    fn review_body_lists_focus_areas() {
        let snapshot = snapshot_with("int main() {\n}\n", 0);
        let request = ActionRequest::Review {
            code: "char buf[8];\ngets(buf);".to_owned(),
            focus: vec!["memory".to_owned(), "  ".to_owned(), "input".to_owned()],
        };
        let payload = PromptContextBuilder::default().build(&request, &snapshot);
        assert_eq!(payload.action, ActionKind::Review);
        assert!(payload.user.contains("Review this code, focusing on memory, input:\n```c\n"));
        assert!(matches!(payload.subject, ActionSubject::Review { ref focus, .. } if focus.len() == 3));
    }
}
