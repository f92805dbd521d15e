//! Persistent per-project memory.
//!
//! [`ProjectMemoryStore`] owns `<root>/.quill/`: the full memory document
//! (`memory.json`) and the derived structural index (`index.json`). It is the
//! only writer of persisted state. Reads are served from memory; every
//! mutation is applied in memory first and then persisted under a single
//! async write lock.

mod extract;
mod persist;
mod search;

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use quill_protocol::{
    ActionKind, AiContextSnapshot, AiInteraction, ContextPatch, CurrentFile, EditingContext,
    FileRecord, HistoryEntry, HistoryKind, ImportError, IndexDocument, InitError, IoError,
    MEMORY_SCHEMA_VERSION, MemorySnapshot, MemoryStats, Project, ProjectId, SearchResult,
    SearchScope,
};
use serde::Deserialize;
use serde_json::json;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

pub use extract::extract_facts;
pub use persist::MEMORY_DIR as MEMORY_DIR_NAME;

use persist::{Layout, encode_pretty, write_atomic};

pub const HISTORY_CAP: usize = 1000;
pub const INTERACTION_CAP: usize = 500;
pub const SNAPSHOT_HISTORY: usize = 10;
pub const SNAPSHOT_INTERACTIONS: usize = 5;

#[derive(Debug)]
pub struct ProjectMemoryStore {
    root: PathBuf,
    layout: Layout,
    state: RwLock<MemorySnapshot>,
    write_lock: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
}

impl ProjectMemoryStore {
    /// Create or load the memory for `root`.
    ///
    /// Idempotent: a second call on the same root reloads the persisted
    /// document with the same project id and every file record.
    #[instrument(skip_all, fields(root = ?root.as_ref()))]
    pub async fn initialize(root: impl AsRef<Path>) -> Result<Self, InitError> {
        let requested = root.as_ref();
        fs::create_dir_all(requested)
            .await
            .map_err(|source| InitError::StorageUnavailable {
                path: requested.to_path_buf(),
                source,
            })?;
        let root = fs::canonicalize(requested)
            .await
            .unwrap_or_else(|_| requested.to_path_buf());

        let layout = Layout::new(&root);
        layout.ensure_dir().await?;

        let (state, fresh) = match layout.load().await? {
            Some(snapshot) => (snapshot, false),
            None => (Self::fresh_snapshot(&root), true),
        };
        info!(
            project_id = %state.project.id,
            files = state.files.len(),
            fresh,
            "project memory ready"
        );

        let store = Self {
            root,
            layout,
            state: RwLock::new(state),
            write_lock: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(fresh),
        };
        if fresh && let Err(error) = store.flush().await {
            warn!(%error, "initial memory write failed, will retry on next write");
        }
        Ok(store)
    }

    fn fresh_snapshot(root: &Path) -> MemorySnapshot {
        let now = Utc::now();
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned());
        MemorySnapshot {
            schema_version: MEMORY_SCHEMA_VERSION,
            project: Project {
                id: ProjectId::for_root(root),
                name,
                root: root.to_path_buf(),
                created_at: now,
                last_modified: now,
            },
            files: IndexMap::new(),
            context: EditingContext::default(),
            history: Vec::new(),
            interactions: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory_dir(&self) -> &Path {
        self.layout.dir()
    }

    pub fn project(&self) -> Project {
        self.state.read().project.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Map an editor-supplied path to the root-relative record key.
    pub fn relative_key(&self, path: &str) -> String {
        let candidate = Path::new(path);
        let relative = candidate.strip_prefix(&self.root).unwrap_or(candidate);
        let parts: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().replace('\\', "/")),
                _ => None,
            })
            .collect();
        parts.join("/")
    }

    /// Re-derive facts for `path` and replace its record. Paths that name
    /// the root itself (`.`, `/`, the root) are rejected.
    #[instrument(skip(self, content), fields(path = %path, bytes = content.len()))]
    pub async fn update_file(&self, path: &str, content: &str) -> Result<FileRecord, IoError> {
        let key = self.relative_key(path);
        if key.is_empty() {
            return Err(IoError::InvalidPath {
                path: path.to_owned(),
            });
        }
        let facts = extract_facts(content);
        debug!(
            functions = facts.functions.len(),
            variables = facts.variables.len(),
            imports = facts.imports.len(),
            "extracted facts"
        );
        let record = FileRecord {
            path: key.clone(),
            content: content.to_owned(),
            size: content.len(),
            last_modified: Utc::now(),
            facts,
        };
        let stored = record.clone();
        self.mutate(move |state| {
            state.files.insert(key.clone(), record);
            state.files.sort_keys();
            push_capped(
                &mut state.history,
                HistoryEntry {
                    action: HistoryKind::FileUpdate,
                    details: json!({ "path": key, "bytes": content.len() }),
                    timestamp: Utc::now(),
                },
                HISTORY_CAP,
            );
        })
        .await?;
        Ok(stored)
    }

    /// Shallow-merge `patch` into the editing context. A patch that changes
    /// nothing is not persisted.
    #[instrument(skip(self, patch))]
    pub async fn update_context(&self, patch: &ContextPatch) -> Result<EditingContext, IoError> {
        {
            let mut preview = self.state.read().context.clone();
            if !patch.apply(&mut preview) {
                return Ok(preview);
            }
        }
        self.mutate(|state| {
            let previous_file = state.context.current_file.clone();
            patch.apply(&mut state.context);
            if state.context.current_file != previous_file {
                push_capped(
                    &mut state.history,
                    HistoryEntry {
                        action: HistoryKind::ContextChange,
                        details: json!({
                            "from": previous_file,
                            "to": state.context.current_file,
                        }),
                        timestamp: Utc::now(),
                    },
                    HISTORY_CAP,
                );
            }
            state.context.clone()
        })
        .await
    }

    #[instrument(skip(self, details), fields(action = %kind))]
    pub async fn add_history(
        &self,
        kind: HistoryKind,
        details: serde_json::Value,
    ) -> Result<(), IoError> {
        let entry = HistoryEntry {
            action: kind,
            details,
            timestamp: Utc::now(),
        };
        self.mutate(move |state| push_capped(&mut state.history, entry, HISTORY_CAP))
            .await
    }

    #[instrument(skip(self, prompt, response, metadata), fields(kind = %kind))]
    pub async fn add_interaction(
        &self,
        kind: ActionKind,
        prompt: impl Into<String>,
        response: impl Into<String>,
        metadata: IndexMap<String, serde_json::Value>,
    ) -> Result<(), IoError> {
        let interaction = AiInteraction {
            kind,
            prompt: prompt.into(),
            response: response.into(),
            metadata,
            timestamp: Utc::now(),
        };
        self.mutate(move |state| {
            push_capped(&mut state.interactions, interaction, INTERACTION_CAP)
        })
        .await
    }

    /// Owned view for prompt construction.
    pub fn build_ai_context(&self) -> AiContextSnapshot {
        let state = self.state.read();
        let current_file = state
            .context
            .current_file
            .as_deref()
            .and_then(|path| state.files.get(path))
            .map(|record| CurrentFile {
                path: record.path.clone(),
                content: record.content.clone(),
                facts: record.facts.clone(),
            });
        AiContextSnapshot {
            project: state.project.clone(),
            context: state.context.clone(),
            current_file,
            recent_history: tail(&state.history, SNAPSHOT_HISTORY),
            recent_interactions: tail(&state.interactions, SNAPSHOT_INTERACTIONS),
            index: state
                .files
                .iter()
                .map(|(path, record)| (path.clone(), record.facts.clone()))
                .collect(),
            files: state.files.keys().cloned().collect(),
        }
    }

    pub fn search(&self, query: &str, scope: SearchScope) -> Vec<SearchResult> {
        search::search(&self.state.read(), query, scope)
    }

    pub fn file(&self, path: &str) -> Option<FileRecord> {
        let key = self.relative_key(path);
        self.state.read().files.get(&key).cloned()
    }

    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        tail(&self.state.read().history, limit)
    }

    pub fn recent_interactions(&self, limit: usize) -> Vec<AiInteraction> {
        tail(&self.state.read().interactions, limit)
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.state.read();
        let facts = state.files.values().map(|record| &record.facts);
        let (functions, variables, imports) = facts.fold((0, 0, 0), |acc, facts| {
            (
                acc.0 + facts.functions.len(),
                acc.1 + facts.variables.len(),
                acc.2 + facts.imports.len(),
            )
        });
        MemoryStats {
            project_id: state.project.id.clone(),
            project_name: state.project.name.clone(),
            files: state.files.len(),
            functions,
            variables,
            imports,
            history: state.history.len(),
            interactions: state.interactions.len(),
            created_at: state.project.created_at,
            last_modified: state.project.last_modified,
            dirty: self.is_dirty(),
        }
    }

    /// Reset files, context, history and interactions. Project identity is
    /// kept.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), IoError> {
        self.mutate(|state| {
            let removed = state.files.len();
            state.files.clear();
            state.context = EditingContext::default();
            state.interactions.clear();
            state.history = vec![HistoryEntry {
                action: HistoryKind::Clear,
                details: json!({ "files_removed": removed }),
                timestamp: Utc::now(),
            }];
        })
        .await
    }

    pub fn export(&self) -> MemorySnapshot {
        self.state.read().clone()
    }

    pub fn export_json(&self) -> Result<String, IoError> {
        serde_json::to_string_pretty(&*self.state.read()).map_err(|error| IoError::Encode {
            what: "memory export",
            message: error.to_string(),
        })
    }

    /// Merge an exported document into this store.
    ///
    /// The payload is decoded and validated in full before live state is
    /// touched. Imported files override same-path records, history and
    /// interactions are appended (caps re-applied), an imported editing
    /// context replaces the current one. Project identity is kept.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn import_json(&self, payload: &str) -> Result<ImportSummary, ImportError> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|error| ImportError::Malformed(error.to_string()))?;
        self.import(value).await
    }

    pub async fn import(&self, payload: serde_json::Value) -> Result<ImportSummary, ImportError> {
        if !payload.is_object() {
            return Err(ImportError::Malformed("expected a JSON object".to_owned()));
        }
        let document: ImportDocument = serde_json::from_value(payload)
            .map_err(|error| ImportError::Malformed(error.to_string()))?;
        let validated = self.validate_import(document)?;
        let summary = ImportSummary {
            files: validated.files.len(),
            history: validated.history.len(),
            interactions: validated.interactions.len(),
            context_replaced: validated.context.is_some(),
        };

        self.mutate(move |state| {
            for record in validated.files {
                state.files.insert(record.path.clone(), record);
            }
            state.files.sort_keys();
            state.history.extend(validated.history);
            state.interactions.extend(validated.interactions);
            if let Some(context) = validated.context {
                state.context = context;
            }
            push_capped(
                &mut state.history,
                HistoryEntry {
                    action: HistoryKind::Import,
                    details: json!({
                        "files": summary.files,
                        "history": summary.history,
                        "interactions": summary.interactions,
                    }),
                    timestamp: Utc::now(),
                },
                HISTORY_CAP,
            );
            truncate_front(&mut state.interactions, INTERACTION_CAP);
        })
        .await?;
        info!(
            files = summary.files,
            history = summary.history,
            interactions = summary.interactions,
            "imported memory"
        );
        Ok(summary)
    }

    fn validate_import(&self, document: ImportDocument) -> Result<ValidatedImport, ImportError> {
        if let Some(version) = document.schema_version
            && version > MEMORY_SCHEMA_VERSION
        {
            return Err(ImportError::Invalid(format!(
                "schema version {version} is newer than supported {MEMORY_SCHEMA_VERSION}"
            )));
        }

        let now = Utc::now();
        let mut files = Vec::with_capacity(document.files.len());
        for (path, file) in document.files {
            if Path::new(&path).is_absolute()
                || Path::new(&path)
                    .components()
                    .any(|component| matches!(component, Component::ParentDir))
            {
                return Err(ImportError::Invalid(format!(
                    "file path `{path}` escapes the project root"
                )));
            }
            let key = self.relative_key(&path);
            if key.is_empty() {
                return Err(ImportError::Invalid("file with empty path".to_owned()));
            }
            files.push(FileRecord {
                path: key,
                size: file.content.len(),
                facts: extract_facts(&file.content),
                last_modified: file.last_modified.unwrap_or(now),
                content: file.content,
            });
        }

        Ok(ValidatedImport {
            files,
            context: document.context,
            history: document.history,
            interactions: document.interactions,
        })
    }

    /// Persist if an earlier write failed. Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool, IoError> {
        let _guard = self.write_lock.lock().await;
        if !self.is_dirty() {
            return Ok(false);
        }
        let payloads = encode_documents(&self.state.read());
        self.persist(payloads).await?;
        Ok(true)
    }

    async fn mutate<R>(&self, apply: impl FnOnce(&mut MemorySnapshot) -> R) -> Result<R, IoError> {
        let _guard = self.write_lock.lock().await;
        let (result, payloads) = {
            let mut state = self.state.write();
            let result = apply(&mut *state);
            state.project.last_modified = Utc::now();
            (result, encode_documents(&state))
        };
        self.persist(payloads).await?;
        Ok(result)
    }

    async fn persist(&self, payloads: Result<(Vec<u8>, Vec<u8>), IoError>) -> Result<(), IoError> {
        let outcome = match payloads {
            Ok((memory, index)) => {
                match write_atomic(&self.layout.memory_path(), &memory).await {
                    Ok(()) => write_atomic(&self.layout.index_path(), &index).await,
                    Err(error) => Err(error),
                }
            }
            Err(error) => Err(error),
        };
        match outcome {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(error) => {
                self.dirty.store(true, Ordering::SeqCst);
                warn!(%error, "memory write failed, state kept in memory");
                Err(error)
            }
        }
    }
}

fn encode_documents(state: &MemorySnapshot) -> Result<(Vec<u8>, Vec<u8>), IoError> {
    let index = IndexDocument {
        schema_version: MEMORY_SCHEMA_VERSION,
        project_id: state.project.id.clone(),
        generated_at: state.project.last_modified,
        files: state
            .files
            .iter()
            .map(|(path, record)| (path.clone(), record.facts.clone()))
            .collect(),
    };
    Ok((
        encode_pretty("memory document", state)?,
        encode_pretty("index document", &index)?,
    ))
}

fn push_capped<T>(items: &mut Vec<T>, item: T, cap: usize) {
    items.push(item);
    truncate_front(items, cap);
}

fn truncate_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

fn tail<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items[items.len().saturating_sub(limit)..].to_vec()
}

/// What an import merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub files: usize,
    pub history: usize,
    pub interactions: usize,
    pub context_replaced: bool,
}

#[derive(Debug, Deserialize)]
struct ImportDocument {
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    files: IndexMap<String, ImportedFile>,
    #[serde(default)]
    context: Option<EditingContext>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(default)]
    interactions: Vec<AiInteraction>,
}

#[derive(Debug, Deserialize)]
struct ImportedFile {
    content: String,
    #[serde(default)]
    last_modified: Option<chrono::DateTime<Utc>>,
}

struct ValidatedImport {
    files: Vec<FileRecord>,
    context: Option<EditingContext>,
    history: Vec<HistoryEntry>,
    interactions: Vec<AiInteraction>,
}
