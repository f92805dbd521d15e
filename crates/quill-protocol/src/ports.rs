//! Runtime ports between the orchestration core and its collaborators.
//!
//! Completion providers and the compiler/runner are the only external
//! boundaries. Both traits use `async-trait` so the runtime can hold them as
//! `Arc<dyn ...>` and pick implementations from configuration at startup.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{ActionKind, ActionSubject};
use crate::error::{ProviderError, ToolchainError};
use crate::ids::RequestId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl CompletionOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Defaults tuned per action: short, cool completions; larger budgets
    /// for whole-file work.
    pub fn for_action(action: ActionKind) -> Self {
        match action {
            ActionKind::Completion => Self {
                max_tokens: 256,
                temperature: 0.1,
                timeout_ms: 10_000,
            },
            ActionKind::Refactor | ActionKind::Diagnosis | ActionKind::Review => Self {
                max_tokens: 2048,
                temperature: 0.1,
                timeout_ms: 30_000,
            },
            ActionKind::Generation => Self {
                max_tokens: 2048,
                temperature: 0.2,
                timeout_ms: 30_000,
            },
        }
    }
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self::for_action(ActionKind::Completion)
    }
}

/// A bounded prompt ready to send to any provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub action: ActionKind,
    pub system: String,
    pub user: String,
    pub subject: ActionSubject,
}

impl PromptPayload {
    pub fn char_len(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub request_id: RequestId,
    pub prompt: PromptPayload,
    pub options: CompletionOptions,
}

impl ProviderRequest {
    pub fn new(prompt: PromptPayload, options: CompletionOptions) -> Self {
        Self {
            request_id: RequestId::new_uuid(),
            prompt,
            options,
        }
    }

    pub fn action(&self) -> ActionKind {
        self.prompt.action
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Variable,
    Function,
    Snippet,
    Module,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub label: String,
    pub insert_text: String,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    pub kind: SuggestionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider: String,
    pub text: String,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    /// Undecoded provider payload, kept for diagnostics.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable name used in attempt logs and interaction metadata.
    fn name(&self) -> &str;

    /// True for adapters that never touch the network.
    fn is_local(&self) -> bool {
        false
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Cheap connectivity check. Returns the number of models the provider
    /// advertises when it lists them.
    async fn check_health(&self) -> Result<Option<usize>, ProviderError> {
        Ok(None)
    }
}

/// Result of [`ProviderAdapter::check_health`] for one chain member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderError>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub success: bool,
    pub output: String,
    pub error: String,
}

/// Compiler and runner collaborator.
#[async_trait]
pub trait ToolchainPort: Send + Sync {
    async fn compile(&self, source: &str) -> Result<CompileOutput, ToolchainError>;
    async fn run(&self, source: &str) -> Result<RunOutput, ToolchainError>;
}
