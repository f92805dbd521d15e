//! Explicit orchestration context for one open project.
//!
//! [`KernelBuilder`] resolves configuration once and opens an
//! [`OrchestrationContext`], which the hosts keep for the lifetime of the
//! project and flush on [`OrchestrationContext::close`].

mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use quill_context::{ContextConfig, PromptContextBuilder};
use quill_memory::{ImportSummary, ProjectMemoryStore};
use quill_protocol::{
    AiContextSnapshot, AssistError, CompilationState, CompileOutput, ContextPatch,
    CursorPosition, DiagnosisOutcome, EditingContext, FileRecord, GenerationOutcome, HistoryKind,
    ImportError, IoError, MemorySnapshot, MemoryStats, Project, ProviderAdapter, ProviderHealth,
    ProviderResponse, RefactorOutcome, ReviewOutcome, RunOutput, SearchResult, SearchScope,
    ToolchainError, ToolchainPort,
};
use quill_runtime::{AssistRuntime, FallbackDispatcher, RuntimeCacheStats, RuntimeConfig};
use quill_toolchain::ProcessToolchain;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

pub use settings::ProviderSettings;

pub struct KernelBuilder {
    root: PathBuf,
    providers: ProviderSettings,
    adapters: Option<Vec<Arc<dyn ProviderAdapter>>>,
    context: ContextConfig,
    runtime: RuntimeConfig,
    toolchain: Option<Arc<dyn ToolchainPort>>,
}

impl KernelBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            providers: ProviderSettings::offline(),
            adapters: None,
            context: ContextConfig::default(),
            runtime: RuntimeConfig::default(),
            toolchain: None,
        }
    }

    pub fn providers(mut self, providers: ProviderSettings) -> Self {
        self.providers = providers;
        self
    }

    /// Use an explicit adapter chain instead of resolving one from
    /// [`ProviderSettings`].
    pub fn adapters(mut self, adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn context_config(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn runtime_config(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn toolchain(mut self, toolchain: Arc<dyn ToolchainPort>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn open(self) -> Result<OrchestrationContext> {
        let memory = Arc::new(
            ProjectMemoryStore::initialize(&self.root)
                .await
                .with_context(|| format!("opening project at {}", self.root.display()))?,
        );
        let adapters = match self.adapters {
            Some(adapters) => adapters,
            None => self.providers.build_chain()?,
        };
        let runtime = AssistRuntime::new(
            Arc::clone(&memory),
            PromptContextBuilder::new(self.context),
            FallbackDispatcher::new(adapters),
            self.runtime,
        );
        let toolchain: Arc<dyn ToolchainPort> = match self.toolchain {
            Some(toolchain) => toolchain,
            None => Arc::new(ProcessToolchain::default()),
        };

        let project = memory.project();
        info!(project = %project.name, id = %project.id, "project opened");
        Ok(OrchestrationContext {
            memory,
            runtime: Arc::new(runtime),
            toolchain,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelStats {
    pub memory: MemoryStats,
    pub cache: RuntimeCacheStats,
    pub providers: Vec<String>,
}

#[derive(Clone)]
pub struct OrchestrationContext {
    memory: Arc<ProjectMemoryStore>,
    runtime: Arc<AssistRuntime>,
    toolchain: Arc<dyn ToolchainPort>,
}

impl OrchestrationContext {
    /// Open `root` with providers configured from the environment.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        KernelBuilder::new(root)
            .providers(ProviderSettings::from_env())
            .open()
            .await
    }

    pub fn root(&self) -> &Path {
        self.memory.root()
    }

    pub fn project(&self) -> Project {
        self.memory.project()
    }

    pub fn providers(&self) -> Vec<String> {
        self.runtime.dispatcher().provider_names()
    }

    pub async fn update_file(&self, path: &str, content: &str) -> Result<FileRecord, IoError> {
        self.memory.update_file(path, content).await
    }

    pub async fn update_context(&self, patch: &ContextPatch) -> Result<EditingContext, IoError> {
        self.memory.update_context(patch).await
    }

    pub fn file(&self, path: &str) -> Option<FileRecord> {
        self.memory.file(path)
    }

    pub fn context_snapshot(&self) -> AiContextSnapshot {
        self.memory.build_ai_context()
    }

    pub async fn request_completion(
        &self,
        cursor: CursorPosition,
        selection: impl Into<String>,
    ) -> Result<ProviderResponse, AssistError> {
        self.runtime.request_completion(cursor, selection).await
    }

    pub async fn request_refactor(
        &self,
        code: impl Into<String>,
        intent: impl Into<String>,
    ) -> Result<RefactorOutcome, AssistError> {
        self.runtime.request_refactor(code, intent).await
    }

    pub async fn request_diagnosis(
        &self,
        error_message: impl Into<String>,
        code: impl Into<String>,
    ) -> Result<DiagnosisOutcome, AssistError> {
        self.runtime.request_diagnosis(error_message, code).await
    }

    pub async fn request_generation(
        &self,
        prompt: impl Into<String>,
    ) -> Result<GenerationOutcome, AssistError> {
        self.runtime.request_generation(prompt).await
    }

    pub async fn request_review(
        &self,
        code: impl Into<String>,
        focus: Vec<String>,
    ) -> Result<ReviewOutcome, AssistError> {
        self.runtime.request_review(code, focus).await
    }

    /// Connectivity of every provider in the chain, in chain order.
    pub async fn provider_health(&self) -> Vec<ProviderHealth> {
        self.runtime.provider_health().await
    }

    /// Diagnose the last recorded build or run error against the current
    /// file. `None` when no error is recorded.
    pub async fn diagnose_last_error(&self) -> Result<Option<DiagnosisOutcome>, AssistError> {
        let snapshot = self.memory.build_ai_context();
        let Some(error) = snapshot.context.last_error else {
            return Ok(None);
        };
        let code = snapshot
            .current_file
            .map(|file| file.content)
            .unwrap_or_default();
        self.runtime.request_diagnosis(error, code).await.map(Some)
    }

    pub fn search(&self, query: &str, scope: SearchScope) -> Vec<SearchResult> {
        self.memory.search(query, scope)
    }

    pub fn export(&self) -> MemorySnapshot {
        self.memory.export()
    }

    pub fn export_json(&self) -> Result<String, IoError> {
        self.memory.export_json()
    }

    pub async fn import_json(&self, payload: &str) -> Result<ImportSummary, ImportError> {
        let summary = self.memory.import_json(payload).await?;
        self.runtime.clear_caches();
        Ok(summary)
    }

    pub async fn import(&self, payload: serde_json::Value) -> Result<ImportSummary, ImportError> {
        let summary = self.memory.import(payload).await?;
        self.runtime.clear_caches();
        Ok(summary)
    }

    pub async fn clear(&self) -> Result<(), IoError> {
        self.memory.clear().await?;
        self.runtime.clear_caches();
        Ok(())
    }

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            memory: self.memory.stats(),
            cache: self.runtime.cache_stats(),
            providers: self.providers(),
        }
    }

    /// Log a compile result and move the editing context to its outcome.
    pub async fn record_compilation(&self, output: &CompileOutput) -> Result<(), IoError> {
        self.memory
            .add_history(
                HistoryKind::Compilation,
                json!({
                    "success": output.success,
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                }),
            )
            .await?;
        let patch = if output.success {
            ContextPatch {
                compilation_state: Some(CompilationState::Succeeded),
                last_error: Some(None),
                ..ContextPatch::default()
            }
        } else {
            ContextPatch {
                compilation_state: Some(CompilationState::Failed),
                last_error: Some(Some(output.stderr.clone())),
                ..ContextPatch::default()
            }
        };
        self.memory.update_context(&patch).await.map(|_| ())
    }

    pub async fn record_execution(&self, output: &RunOutput) -> Result<(), IoError> {
        self.memory
            .add_history(
                HistoryKind::Execution,
                json!({
                    "success": output.success,
                    "output": output.output,
                    "error": output.error,
                }),
            )
            .await?;
        let patch = if output.success {
            ContextPatch {
                compilation_state: Some(CompilationState::Idle),
                last_error: Some(None),
                ..ContextPatch::default()
            }
        } else {
            ContextPatch {
                compilation_state: Some(CompilationState::Failed),
                last_error: Some(Some(output.error.clone())),
                ..ContextPatch::default()
            }
        };
        self.memory.update_context(&patch).await.map(|_| ())
    }

    /// Compile `source` with the toolchain and record the result.
    #[instrument(skip_all, fields(source_len = source.len()))]
    pub async fn compile(&self, source: &str) -> Result<CompileOutput> {
        self.set_state(CompilationState::Compiling).await?;
        let output = match self.toolchain.compile(source).await {
            Ok(output) => output,
            Err(error) => return Err(self.record_toolchain_failure(error).await),
        };
        self.record_compilation(&output).await?;
        Ok(output)
    }

    /// Compile and run `source`, recording the outcome.
    #[instrument(skip_all, fields(source_len = source.len()))]
    pub async fn run(&self, source: &str) -> Result<RunOutput> {
        self.set_state(CompilationState::Running).await?;
        let output = match self.toolchain.run(source).await {
            Ok(output) => output,
            Err(error) => return Err(self.record_toolchain_failure(error).await),
        };
        self.record_execution(&output).await?;
        Ok(output)
    }

    /// The toolchain itself failed: leave the context `failed` with the
    /// error text so it is not stuck in `compiling` or `running`.
    async fn record_toolchain_failure(&self, error: ToolchainError) -> anyhow::Error {
        let patch = ContextPatch {
            compilation_state: Some(CompilationState::Failed),
            last_error: Some(Some(error.to_string())),
            ..ContextPatch::default()
        };
        if let Err(write_error) = self.memory.update_context(&patch).await {
            warn!(%write_error, "failed to record toolchain failure");
        }
        error.into()
    }

    async fn set_state(&self, state: CompilationState) -> Result<(), IoError> {
        self.memory
            .update_context(&ContextPatch {
                compilation_state: Some(state),
                ..ContextPatch::default()
            })
            .await
            .map(|_| ())
    }

    /// Cancel in-flight requests and flush memory.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        self.runtime.shutdown();
        let evicted = self.runtime.evict_expired();
        self.memory.flush().await.context("flushing project memory")?;
        info!(evicted, "project closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quill_protocol::ActionKind;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    /// Replies with a fixed compiler diagnostic.
    struct FixedToolchain;

    #[async_trait]
    impl ToolchainPort for FixedToolchain {
        async fn compile(&self, _source: &str) -> Result<CompileOutput, ToolchainError> {
            Ok(CompileOutput {
                success: false,
                stdout: String::new(),
                stderr: "main.c:4:5: error: expected ';' before '}' token".to_owned(),
            })
        }

        async fn run(&self, _source: &str) -> Result<RunOutput, ToolchainError> {
            Ok(RunOutput {
                success: true,
                output: "hi\n".to_owned(),
                error: String::new(),
            })
        }
    }

    /// Cannot even start the compiler.
    struct MissingToolchain;

    #[async_trait]
    impl ToolchainPort for MissingToolchain {
        async fn compile(&self, _source: &str) -> Result<CompileOutput, ToolchainError> {
            Err(ToolchainError::Spawn {
                command: "cc".to_owned(),
                message: "No such file or directory".to_owned(),
            })
        }

        async fn run(&self, _source: &str) -> Result<RunOutput, ToolchainError> {
            Err(ToolchainError::Workspace("read-only temp dir".to_owned()))
        }
    }

    const MAIN_C: &str = "#include <stdio.h>\n\nint main() {\n    int total = 0\n    pr\n}\n";

    async fn open_offline(name: &str) -> Result<OrchestrationContext> {
        KernelBuilder::new(unique_test_root(name))
            .toolchain(Arc::new(FixedToolchain))
            .open()
            .await
    }

    #[tokio::test]
    async fn offline_context_completes_from_project_symbols() -> Result<()> {
        let kernel = open_offline("quill-kernel-complete").await?;
        assert_eq!(kernel.providers(), vec!["local"]);
        kernel.update_file("main.c", MAIN_C).await?;
        kernel
            .update_context(&ContextPatch {
                current_file: Some(Some("main.c".to_owned())),
                ..ContextPatch::default()
            })
            .await?;

        let snapshot = kernel.context_snapshot();
        assert_eq!(snapshot.imports(), vec!["stdio.h"]);
        assert!(snapshot.known_functions().iter().any(|name| name == "main"));

        let response = kernel
            .request_completion(CursorPosition::new(5, 7), "")
            .await?;
        assert_eq!(response.provider, "local");
        assert!(
            response
                .suggestions
                .iter()
                .any(|suggestion| suggestion.label == "printf")
        );
        kernel.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn failed_build_feeds_diagnosis() -> Result<()> {
        let kernel = open_offline("quill-kernel-diagnose").await?;
        kernel.update_file("main.c", MAIN_C).await?;
        kernel
            .update_context(&ContextPatch {
                current_file: Some(Some("main.c".to_owned())),
                ..ContextPatch::default()
            })
            .await?;
        assert!(kernel.diagnose_last_error().await?.is_none());

        let output = kernel.compile(MAIN_C).await?;
        assert!(!output.success);
        let snapshot = kernel.context_snapshot();
        assert_eq!(snapshot.context.compilation_state, CompilationState::Failed);

        let diagnosis = kernel
            .diagnose_last_error()
            .await?
            .ok_or_else(|| anyhow::anyhow!("expected a diagnosis"))?;
        assert_eq!(diagnosis.provider, "local");
        assert!(diagnosis.diagnosis.to_lowercase().contains("semicolon"));

        let stats = kernel.stats();
        assert_eq!(stats.memory.interactions, 1);
        assert!(
            kernel
                .context_snapshot()
                .recent_interactions
                .iter()
                .all(|interaction| interaction.kind == ActionKind::Diagnosis)
        );

        kernel.run(MAIN_C).await?;
        let after_run = kernel.context_snapshot();
        assert_eq!(after_run.context.compilation_state, CompilationState::Idle);
        assert!(after_run.context.last_error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn clear_keeps_project_identity() -> Result<()> {
        let kernel = open_offline("quill-kernel-clear").await?;
        let id = kernel.project().id;
        kernel.update_file("main.c", MAIN_C).await?;
        kernel.clear().await?;
        assert_eq!(kernel.project().id, id);
        assert_eq!(kernel.stats().memory.files, 0);
        assert!(kernel.search("main", SearchScope::All).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn toolchain_error_leaves_context_failed() -> Result<()> {
        let kernel = KernelBuilder::new(unique_test_root("quill-kernel-toolchain-error"))
            .toolchain(Arc::new(MissingToolchain))
            .open()
            .await?;

        assert!(kernel.compile(MAIN_C).await.is_err());
        let context = kernel.context_snapshot().context;
        assert_eq!(context.compilation_state, CompilationState::Failed);
        assert!(context.last_error.as_deref().is_some_and(|error| error.contains("cc")));

        assert!(kernel.run(MAIN_C).await.is_err());
        let context = kernel.context_snapshot().context;
        assert_eq!(context.compilation_state, CompilationState::Failed);
        assert!(context.last_error.as_deref().is_some_and(|error| error.contains("read-only")));
        Ok(())
    }

    #[tokio::test]
    async fn offline_review_and_health() -> Result<()> {
        let kernel = open_offline("quill-kernel-review").await?;
        let review = kernel
            .request_review("char line[32];\ngets(line);\n", Vec::new())
            .await?;
        assert_eq!(review.provider, "local");
        assert_eq!(review.issues.len(), 1);
        assert_eq!(review.issues[0].line, Some(2));

        let health = kernel.provider_health().await;
        assert_eq!(health.len(), 1);
        assert!(health[0].healthy);
        assert_eq!(kernel.stats().cache.reviews.misses, 1);
        Ok(())
    }
}
