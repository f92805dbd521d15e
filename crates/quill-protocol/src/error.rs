//! Error taxonomy for the assistance core.
//!
//! Provider-level errors are always recoverable through fallback and never
//! reach the editor directly. Only [`AssistError`] (from request paths) and
//! [`IoError`] (from memory writes) are surfaced to host layers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::ActionKind;

/// The memory store could not acquire its storage location.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot acquire memory directory {path:?}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read memory document {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A persistence operation failed. Non-fatal: state stays in memory and the
/// next write retries.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed writing {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed reading {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed encoding {what}: {message}")]
    Encode { what: &'static str, message: String },
    #[error("path {path:?} does not name a file inside the project")]
    InvalidPath { path: String },
}

/// An import payload was rejected before any live state was touched.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import payload is not a memory document: {0}")]
    Malformed(String),
    #[error("import payload failed validation: {0}")]
    Invalid(String),
    #[error(transparent)]
    Io(#[from] IoError),
}

/// Normalized failure shape every provider adapter maps into.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized(_) => "unauthorized",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Unreachable(_) => "unreachable",
            ProviderError::MalformedResponse(_) => "malformed_response",
            ProviderError::Unknown(_) => "unknown",
        }
    }
}

/// One step of a fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderError>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Every provider in the chain failed, including the local adapter.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("all {} providers failed", .attempts.len())]
pub struct ExhaustedFailure {
    pub attempts: Vec<AttemptRecord>,
}

/// The compiler/runner collaborator could not be driven.
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed preparing toolchain workspace: {0}")]
    Workspace(String),
    #[error("failed spawning {command}: {message}")]
    Spawn { command: String, message: String },
}

/// Errors surfaced by assistance requests.
#[derive(Debug, Error)]
pub enum AssistError {
    #[error(transparent)]
    Exhausted(#[from] ExhaustedFailure),
    #[error("{0} request superseded by a newer one")]
    Superseded(ActionKind),
}
