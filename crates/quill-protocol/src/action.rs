//! Editing actions and their structured outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The assistance actions the editor can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Completion,
    Refactor,
    Diagnosis,
    Generation,
    Review,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Completion,
        ActionKind::Refactor,
        ActionKind::Diagnosis,
        ActionKind::Generation,
        ActionKind::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Completion => "completion",
            ActionKind::Refactor => "refactor",
            ActionKind::Diagnosis => "diagnosis",
            ActionKind::Generation => "generation",
            ActionKind::Review => "review",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based line, 1-based column, as editors report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: usize,
    pub column: usize,
}

impl CursorPosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// What the editor asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    Completion {
        cursor: CursorPosition,
        #[serde(default)]
        selection: String,
    },
    Refactor {
        code: String,
        #[serde(default)]
        intent: String,
    },
    Diagnosis {
        error_message: String,
        code: String,
    },
    Generation {
        prompt: String,
    },
    Review {
        code: String,
        /// Areas to emphasise, e.g. "memory" or "performance".
        #[serde(default)]
        focus: Vec<String>,
    },
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::Completion { .. } => ActionKind::Completion,
            ActionRequest::Refactor { .. } => ActionKind::Refactor,
            ActionRequest::Diagnosis { .. } => ActionKind::Diagnosis,
            ActionRequest::Generation { .. } => ActionKind::Generation,
            ActionRequest::Review { .. } => ActionKind::Review,
        }
    }
}

/// Structured inputs carried alongside the prose prompt so that offline
/// adapters can act without re-parsing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionSubject {
    Completion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        cursor: CursorPosition,
        #[serde(default)]
        selection: String,
        /// Text of the cursor line up to the cursor column.
        #[serde(default)]
        line_prefix: String,
        /// Source lines surrounding the cursor, in file order.
        #[serde(default)]
        surrounding: String,
        /// Function names from the project index, current file first.
        #[serde(default)]
        known_functions: Vec<String>,
        #[serde(default)]
        known_variables: Vec<String>,
    },
    Refactor {
        code: String,
        #[serde(default)]
        intent: String,
    },
    Diagnosis {
        error_message: String,
        code: String,
    },
    Generation {
        prompt: String,
    },
    Review {
        code: String,
        #[serde(default)]
        focus: Vec<String>,
    },
}

impl ActionSubject {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionSubject::Completion { .. } => ActionKind::Completion,
            ActionSubject::Refactor { .. } => ActionKind::Refactor,
            ActionSubject::Diagnosis { .. } => ActionKind::Diagnosis,
            ActionSubject::Generation { .. } => ActionKind::Generation,
            ActionSubject::Review { .. } => ActionKind::Review,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefactorOutcome {
    pub refactored_code: String,
    pub explanation: String,
    #[serde(default)]
    pub changes: Vec<String>,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisOutcome {
    pub diagnosis: String,
    pub suggested_fix: String,
    pub explanation: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub files: Vec<GeneratedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_file: Option<String>,
    pub explanation: String,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub severity: IssueSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub provider: String,
}
