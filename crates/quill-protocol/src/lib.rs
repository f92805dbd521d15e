//! Shared contract for the Quill assistance core.
//!
//! Data model, error taxonomy and the two outward ports (completion
//! providers, compiler/runner). No tokio and no HTTP client here, so host
//! layers can depend on it without pulling in the runtime.
//!
//! - [`ids`]: `ProjectId` from the root path, `RequestId` for log correlation
//! - [`memory`]: files, extracted facts, history, interactions, editing context
//! - [`action`]: editing actions and their outcomes
//! - [`ports`]: `ProviderAdapter`, `ToolchainPort`
//! - [`error`]: errors surfaced to hosts and the per-provider failure shape

pub mod action;
pub mod error;
pub mod ids;
pub mod memory;
pub mod ports;

pub use action::{
    ActionKind, ActionRequest, ActionSubject, CursorPosition, DiagnosisOutcome, GeneratedFile,
    GenerationOutcome, IssueSeverity, RefactorOutcome, ReviewIssue, ReviewOutcome,
};
pub use error::{
    AssistError, AttemptRecord, ExhaustedFailure, ImportError, InitError, IoError, ProviderError,
    ToolchainError,
};
pub use ids::{ProjectId, RequestId};
pub use memory::{
    AiContextSnapshot, AiInteraction, CompilationState, ContextPatch, CurrentFile,
    EditingContext, FileFacts, FileRecord, FunctionFact, HistoryEntry, HistoryKind, ImportFact,
    IndexDocument, MEMORY_SCHEMA_VERSION, MemorySnapshot, MemoryStats, Project, SearchResult,
    SearchScope, VariableFact,
};
pub use ports::{
    CompileOutput, CompletionOptions, ProviderHealth, PromptPayload, ProviderAdapter,
    ProviderRequest, ProviderResponse, RunOutput, Suggestion, SuggestionKind, ToolchainPort,
};
