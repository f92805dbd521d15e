//! Project memory data model.
//!
//! Everything here is a plain owned value. The store in `quill-memory` is the
//! only writer; all other components receive cloned snapshots.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::action::{ActionKind, CursorPosition};
use crate::ids::ProjectId;

/// Version stamped into `memory.json` and `index.json`.
pub const MEMORY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFact {
    pub return_type: String,
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableFact {
    #[serde(rename = "type")]
    pub var_type: String,
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFact {
    pub header: String,
    pub line: usize,
}

/// Structural facts derived from one file's content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFacts {
    #[serde(default)]
    pub functions: Vec<FunctionFact>,
    #[serde(default)]
    pub variables: Vec<VariableFact>,
    #[serde(default)]
    pub imports: Vec<ImportFact>,
}

impl FileFacts {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.variables.is_empty() && self.imports.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub content: String,
    pub size: usize,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub facts: FileFacts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Compilation,
    Execution,
    FileUpdate,
    ContextChange,
    Import,
    Clear,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Compilation => "compilation",
            HistoryKind::Execution => "execution",
            HistoryKind::FileUpdate => "file_update",
            HistoryKind::ContextChange => "context_change",
            HistoryKind::Import => "import",
            HistoryKind::Clear => "clear",
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryKind,
    #[serde(default)]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInteraction {
    pub kind: ActionKind,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationState {
    #[default]
    Idle,
    Compiling,
    Succeeded,
    Failed,
    Running,
}

/// Where the developer is and what the toolchain last said.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditingContext {
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub cursor: CursorPosition,
    #[serde(default)]
    pub selected_text: String,
    #[serde(default)]
    pub compilation_state: CompilationState,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Partial update of [`EditingContext`].
///
/// Absent fields are left unchanged. For the nullable fields an explicit
/// JSON `null` clears the value, so `{"last_error": null}` and `{}` differ.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_file: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compilation_state: Option<CompilationState>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_error: Option<Option<String>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        self.current_file.is_none()
            && self.cursor.is_none()
            && self.selected_text.is_none()
            && self.compilation_state.is_none()
            && self.last_error.is_none()
    }

    /// Shallow-merge into `context`. Returns whether anything changed.
    pub fn apply(&self, context: &mut EditingContext) -> bool {
        let before = context.clone();
        if let Some(current_file) = &self.current_file {
            context.current_file = current_file.clone();
        }
        if let Some(cursor) = self.cursor {
            context.cursor = cursor;
        }
        if let Some(selected_text) = &self.selected_text {
            context.selected_text = selected_text.clone();
        }
        if let Some(state) = self.compilation_state {
            context.compilation_state = state;
        }
        if let Some(last_error) = &self.last_error {
            context.last_error = last_error.clone();
        }
        *context != before
    }
}

/// The current file as seen by prompt construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentFile {
    pub path: String,
    pub content: String,
    pub facts: FileFacts,
}

/// Owned, read-only view of memory handed to the prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiContextSnapshot {
    pub project: Project,
    pub context: EditingContext,
    pub current_file: Option<CurrentFile>,
    pub recent_history: Vec<HistoryEntry>,
    pub recent_interactions: Vec<AiInteraction>,
    /// Facts of every file, keyed by relative path in sorted order.
    pub index: IndexMap<String, FileFacts>,
    pub files: Vec<String>,
}

impl AiContextSnapshot {
    /// Headers included by the current file.
    pub fn imports(&self) -> Vec<&str> {
        self.current_file
            .as_ref()
            .map(|file| {
                file.facts
                    .imports
                    .iter()
                    .map(|import| import.header.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Function names across the project, deduplicated, current file first.
    pub fn known_functions(&self) -> Vec<String> {
        self.facts_current_first()
            .flat_map(|facts| facts.functions.iter().map(|f| f.name.clone()))
            .collect::<indexmap::IndexSet<_>>()
            .into_iter()
            .collect()
    }

    /// Variable names across the project, deduplicated, current file first.
    pub fn known_variables(&self) -> Vec<String> {
        self.facts_current_first()
            .flat_map(|facts| facts.variables.iter().map(|v| v.name.clone()))
            .collect::<indexmap::IndexSet<_>>()
            .into_iter()
            .collect()
    }

    fn facts_current_first(&self) -> impl Iterator<Item = &FileFacts> {
        let current = self.current_file.as_ref().map(|file| file.path.as_str());
        current
            .and_then(|path| self.index.get(path))
            .into_iter()
            .chain(
                self.index
                    .iter()
                    .filter(move |(path, _)| Some(path.as_str()) != current)
                    .map(|(_, facts)| facts),
            )
    }
}

/// The full persisted memory document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub schema_version: u32,
    pub project: Project,
    #[serde(default)]
    pub files: IndexMap<String, FileRecord>,
    #[serde(default)]
    pub context: EditingContext,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub interactions: Vec<AiInteraction>,
}

/// Derived facts per file, written next to the memory document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub schema_version: u32,
    pub project_id: ProjectId,
    pub generated_at: DateTime<Utc>,
    pub files: IndexMap<String, FileFacts>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    All,
    Files,
    Symbols,
    History,
    Interactions,
}

impl SearchScope {
    pub fn includes(&self, other: SearchScope) -> bool {
        *self == SearchScope::All || *self == other
    }
}

impl FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(SearchScope::All),
            "files" => Ok(SearchScope::Files),
            "symbols" => Ok(SearchScope::Symbols),
            "history" => Ok(SearchScope::History),
            "interactions" => Ok(SearchScope::Interactions),
            other => Err(format!("unknown search scope `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchResult {
    File {
        path: String,
        line: usize,
        text: String,
    },
    Function {
        path: String,
        name: String,
        return_type: String,
        line: usize,
    },
    Variable {
        path: String,
        name: String,
        var_type: String,
        line: usize,
    },
    History {
        index: usize,
        action: HistoryKind,
        timestamp: DateTime<Utc>,
    },
    Interaction {
        index: usize,
        kind: ActionKind,
        excerpt: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub project_id: ProjectId,
    pub project_name: String,
    pub files: usize,
    pub functions: usize,
    pub variables: usize,
    pub imports: usize,
    pub history: usize,
    pub interactions: usize,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// A previous write failed and state has not been persisted since.
    pub dirty: bool,
}
