//! Request pipeline for assistance actions.
//!
//! ```text
//! ActionRequest
//!   -> SupersedeGate::begin        (cancels the older request of the same kind)
//!   -> CompletionCache lookup      (fingerprint of request + memory snapshot)
//!   -> PromptContextBuilder::build
//!   -> FallbackDispatcher          (remote adapters, then local)
//!   -> outcome parsing, cache put, interaction log
//! ```
//!
//! Refactor, diagnosis and review results share the analysis TTL;
//! generation is never cached.

pub mod cache;
pub mod dispatcher;
pub mod outcome;
pub mod supersede;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use quill_context::{PromptContextBuilder, fence_tag};
use quill_memory::ProjectMemoryStore;
use quill_protocol::{
    ActionKind, ActionRequest, AssistError, CompletionOptions, CursorPosition, DiagnosisOutcome,
    GenerationOutcome, ProviderError, ProviderHealth, ProviderRequest, ProviderResponse,
    RefactorOutcome, ReviewOutcome,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

pub use cache::{CacheStats, CompletionCache, Fingerprint};
pub use dispatcher::{DispatchFailure, DispatchState, Dispatched, FallbackDispatcher};
pub use supersede::{SupersedeGate, Ticket};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub completion_ttl: Duration,
    pub analysis_ttl: Duration,
    pub cache_capacity: usize,
    /// Overrides the per-action attempt timeout when set.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            completion_ttl: Duration::from_secs(30),
            analysis_ttl: Duration::from_secs(300),
            cache_capacity: 256,
            attempt_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeCacheStats {
    pub completions: CacheStats,
    pub refactors: CacheStats,
    pub diagnoses: CacheStats,
    pub reviews: CacheStats,
}

pub struct AssistRuntime {
    memory: Arc<ProjectMemoryStore>,
    builder: PromptContextBuilder,
    dispatcher: FallbackDispatcher,
    config: RuntimeConfig,
    completions: CompletionCache<Fingerprint, ProviderResponse>,
    refactors: CompletionCache<Fingerprint, RefactorOutcome>,
    diagnoses: CompletionCache<Fingerprint, DiagnosisOutcome>,
    reviews: CompletionCache<Fingerprint, ReviewOutcome>,
    gate: SupersedeGate,
}

impl AssistRuntime {
    pub fn new(
        memory: Arc<ProjectMemoryStore>,
        builder: PromptContextBuilder,
        dispatcher: FallbackDispatcher,
        config: RuntimeConfig,
    ) -> Self {
        if !dispatcher.ends_with_local() {
            warn!(
                providers = ?dispatcher.provider_names(),
                "provider chain does not end with the local adapter"
            );
        }
        Self {
            completions: CompletionCache::new(config.cache_capacity),
            refactors: CompletionCache::new(config.cache_capacity),
            diagnoses: CompletionCache::new(config.cache_capacity),
            reviews: CompletionCache::new(config.cache_capacity),
            gate: SupersedeGate::new(),
            memory,
            builder,
            dispatcher,
            config,
        }
    }

    pub fn memory(&self) -> &Arc<ProjectMemoryStore> {
        &self.memory
    }

    pub fn dispatcher(&self) -> &FallbackDispatcher {
        &self.dispatcher
    }

    pub async fn request_completion(
        &self,
        cursor: CursorPosition,
        selection: impl Into<String>,
    ) -> Result<ProviderResponse, AssistError> {
        let request = ActionRequest::Completion {
            cursor,
            selection: selection.into(),
        };
        self.run(
            request,
            Some((&self.completions, self.config.completion_ttl)),
            |response| Ok(response.clone()),
        )
        .await
    }

    pub async fn request_refactor(
        &self,
        code: impl Into<String>,
        intent: impl Into<String>,
    ) -> Result<RefactorOutcome, AssistError> {
        let code = code.into();
        let request = ActionRequest::Refactor {
            code: code.clone(),
            intent: intent.into(),
        };
        let language = self.reply_language();
        self.run(
            request,
            Some((&self.refactors, self.config.analysis_ttl)),
            |response| outcome::parse_refactor(response, &language, &code),
        )
        .await
    }

    pub async fn request_diagnosis(
        &self,
        error_message: impl Into<String>,
        code: impl Into<String>,
    ) -> Result<DiagnosisOutcome, AssistError> {
        let request = ActionRequest::Diagnosis {
            error_message: error_message.into(),
            code: code.into(),
        };
        let language = self.reply_language();
        self.run(
            request,
            Some((&self.diagnoses, self.config.analysis_ttl)),
            |response| outcome::parse_diagnosis(response, &language),
        )
        .await
    }

    pub async fn request_review(
        &self,
        code: impl Into<String>,
        focus: Vec<String>,
    ) -> Result<ReviewOutcome, AssistError> {
        let request = ActionRequest::Review {
            code: code.into(),
            focus,
        };
        self.run(
            request,
            Some((&self.reviews, self.config.analysis_ttl)),
            outcome::parse_review,
        )
        .await
    }

    /// Never cached: the same prompt is expected to produce fresh output.
    pub async fn request_generation(
        &self,
        prompt: impl Into<String>,
    ) -> Result<GenerationOutcome, AssistError> {
        let request = ActionRequest::Generation {
            prompt: prompt.into(),
        };
        let language = self.reply_language();
        self.run(request, None, |response| {
            outcome::parse_generation(response, &language)
        })
        .await
    }

    pub fn evict_expired(&self) -> usize {
        self.completions.evict_expired()
            + self.refactors.evict_expired()
            + self.diagnoses.evict_expired()
            + self.reviews.evict_expired()
    }

    pub fn clear_caches(&self) {
        self.completions.clear();
        self.refactors.clear();
        self.diagnoses.clear();
        self.reviews.clear();
    }

    pub fn cache_stats(&self) -> RuntimeCacheStats {
        RuntimeCacheStats {
            completions: self.completions.stats(),
            refactors: self.refactors.stats(),
            diagnoses: self.diagnoses.stats(),
            reviews: self.reviews.stats(),
        }
    }

    pub async fn provider_health(&self) -> Vec<ProviderHealth> {
        self.dispatcher.check_health().await
    }

    /// Cancel every in-flight request.
    pub fn shutdown(&self) {
        self.gate.cancel_all();
    }

    fn reply_language(&self) -> String {
        fence_tag(&self.builder.config().language)
    }

    fn options_for(&self, kind: ActionKind) -> CompletionOptions {
        let options = CompletionOptions::for_action(kind);
        match self.config.attempt_timeout {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }

    #[instrument(skip_all, fields(action = %request.kind()))]
    async fn run<T: Clone>(
        &self,
        request: ActionRequest,
        cache: Option<(&CompletionCache<Fingerprint, T>, Duration)>,
        accept: impl Fn(&ProviderResponse) -> Result<T, ProviderError>,
    ) -> Result<T, AssistError> {
        let kind = request.kind();
        let ticket = self.gate.begin(kind);
        let snapshot = self.memory.build_ai_context();

        let fingerprint = cache.and_then(|_| Fingerprint::for_request(&request, &snapshot));
        if let (Some((cache, _)), Some(fingerprint)) = (cache, fingerprint.as_ref())
            && let Some(hit) = cache.get(fingerprint)
        {
            debug!("cache hit");
            self.gate.finish(&ticket);
            return Ok(hit);
        }

        let prompt = self.builder.build(&request, &snapshot);
        let provider_request = ProviderRequest::new(prompt, self.options_for(kind));
        let result = self
            .dispatcher
            .dispatch_with(&provider_request, ticket.token(), accept)
            .await;

        if !self.gate.is_current(&ticket) {
            debug!(request_id = %provider_request.request_id, "discarding superseded result");
            return Err(AssistError::Superseded(kind));
        }
        self.gate.finish(&ticket);

        let dispatched = match result {
            Ok(dispatched) => dispatched,
            Err(DispatchFailure::Cancelled { .. }) => return Err(AssistError::Superseded(kind)),
            Err(DispatchFailure::Exhausted(failure)) => return Err(failure.into()),
        };

        if let (Some((cache, ttl)), Some(fingerprint)) = (cache, fingerprint) {
            cache.put(fingerprint, dispatched.value.clone(), ttl);
        }
        info!(
            provider = %dispatched.response.provider,
            attempts = dispatched.attempts.len(),
            "assistance served"
        );

        if kind != ActionKind::Completion {
            self.log_interaction(kind, &provider_request, &dispatched)
                .await;
        }
        Ok(dispatched.value)
    }

    async fn log_interaction<T>(
        &self,
        kind: ActionKind,
        request: &ProviderRequest,
        dispatched: &Dispatched<T>,
    ) {
        let mut metadata = IndexMap::new();
        metadata.insert("request_id".to_owned(), json!(request.request_id));
        metadata.insert("provider".to_owned(), json!(dispatched.response.provider));
        metadata.insert("attempts".to_owned(), json!(dispatched.attempts));
        if let Err(error) = self
            .memory
            .add_interaction(
                kind,
                request.prompt.user.clone(),
                dispatched.response.text.clone(),
                metadata,
            )
            .await
        {
            warn!(%error, "failed to record interaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, Step};
    use anyhow::Result;
    use quill_context::ContextConfig;
    use quill_protocol::{ContextPatch, ProviderAdapter};
    use quill_providers::LocalAdapter;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    async fn runtime_with(
        name: &str,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
    ) -> Result<AssistRuntime> {
        let memory = Arc::new(ProjectMemoryStore::initialize(unique_test_root(name)).await?);
        memory
            .update_file("main.c", "#include <stdio.h>\n\nint main() {\n    pr\n}\n")
            .await?;
        memory
            .update_context(&ContextPatch {
                current_file: Some(Some("main.c".to_owned())),
                ..ContextPatch::default()
            })
            .await?;
        Ok(AssistRuntime::new(
            memory,
            PromptContextBuilder::new(ContextConfig::default()),
            FallbackDispatcher::new(adapters),
            RuntimeConfig::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_cached_until_ttl_expires() -> Result<()> {
        let provider = ScriptedProvider::new("remote", vec![Step::Reply("printf".to_owned())]);
        let runtime = runtime_with("quill-runtime-cache", vec![provider.clone()]).await?;
        let cursor = CursorPosition::new(4, 7);

        let first = runtime.request_completion(cursor, "").await?;
        let second = runtime.request_completion(cursor, "").await?;
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        runtime.request_completion(cursor, "").await?;
        assert_eq!(provider.calls(), 2);
        assert_eq!(runtime.cache_stats().completions.hits, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn newer_completion_supersedes_older() -> Result<()> {
        let provider = ScriptedProvider::new(
            "remote",
            vec![Step::Hang, Step::Reply("second".to_owned())],
        );
        let runtime = Arc::new(runtime_with("quill-runtime-supersede", vec![provider]).await?);

        let older = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move {
                runtime
                    .request_completion(CursorPosition::new(4, 6), "")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        let newer = runtime
            .request_completion(CursorPosition::new(4, 7), "")
            .await?;

        assert_eq!(newer.text, "second");
        assert!(matches!(
            older.await?,
            Err(AssistError::Superseded(ActionKind::Completion))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refactor_is_logged_and_cached() -> Result<()> {
        let provider = ScriptedProvider::new(
            "remote",
            vec![Step::Reply(
                json!({"refactored_code": "int x = 1;", "explanation": "spacing"}).to_string(),
            )],
        );
        let runtime = runtime_with("quill-runtime-refactor", vec![provider.clone()]).await?;

        let outcome = runtime.request_refactor("int x=1;", "tidy").await?;
        assert_eq!(outcome.refactored_code, "int x = 1;");
        assert_eq!(outcome.provider, "remote");
        runtime.request_refactor("int x=1;", "tidy").await?;
        assert_eq!(provider.calls(), 1);

        let interactions = runtime.memory().recent_interactions(5);
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].kind, ActionKind::Refactor);
        assert_eq!(interactions[0].metadata["provider"], "remote");
        Ok(())
    }

    #[tokio::test]
    async fn blank_refactor_is_answered_locally() -> Result<()> {
        let runtime =
            runtime_with("quill-runtime-blank-refactor", vec![Arc::new(LocalAdapter::new())]).await?;
        for code in ["   ", ""] {
            let outcome = runtime.request_refactor(code, "tidy").await?;
            assert_eq!(outcome.provider, "local");
            assert!(outcome.refactored_code.trim().is_empty());
            assert!(outcome.changes.is_empty());
        }
        Ok(())
    }

    #[tokio::test]
    async fn review_is_cached_and_logged() -> Result<()> {
        let provider = ScriptedProvider::new(
            "remote",
            vec![Step::Reply(
                json!({
                    "summary": "One risky call.",
                    "issues": [{"message": "gets() can overflow", "line": 2, "severity": "error"}],
                    "suggestions": ["Use fgets"]
                })
                .to_string(),
            )],
        );
        let runtime = runtime_with("quill-runtime-review", vec![provider.clone()]).await?;
        let code = "char buf[8];\ngets(buf);";

        let outcome = runtime.request_review(code, vec!["memory".to_owned()]).await?;
        assert_eq!(outcome.issues[0].line, Some(2));
        runtime.request_review(code, vec!["memory".to_owned()]).await?;
        assert_eq!(provider.calls(), 1);
        assert_eq!(runtime.cache_stats().reviews.hits, 1);

        let interactions = runtime.memory().recent_interactions(5);
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].kind, ActionKind::Review);
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_generation_falls_back_to_local() -> Result<()> {
        let provider = ScriptedProvider::new("remote", vec![Step::Reply("sorry".to_owned())]);
        let runtime = runtime_with(
            "quill-runtime-generation",
            vec![provider, Arc::new(LocalAdapter::new())],
        )
        .await?;
        let outcome = runtime
            .request_generation("build me a calculator")
            .await?;
        assert_eq!(outcome.provider, "local");
        assert_eq!(outcome.main_file.as_deref(), Some("main.c"));
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_chain_surfaces_every_attempt() -> Result<()> {
        let runtime = runtime_with(
            "quill-runtime-exhausted",
            vec![
                ScriptedProvider::new(
                    "a",
                    vec![Step::Fail(ProviderError::Unauthorized("no key".to_owned()))],
                ),
                ScriptedProvider::new(
                    "b",
                    vec![Step::Fail(ProviderError::Unreachable("down".to_owned()))],
                ),
            ],
        )
        .await?;
        match runtime.request_diagnosis("error: x undeclared", "x = 1;").await {
            Err(AssistError::Exhausted(failure)) => assert_eq!(failure.attempts.len(), 2),
            other => anyhow::bail!("expected exhaustion, got {other:?}"),
        }
        Ok(())
    }
}
