//! Scripted providers and fixtures for runtime tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quill_protocol::{
    ActionKind, ActionSubject, CompletionOptions, CursorPosition, PromptPayload, ProviderAdapter,
    ProviderError, ProviderRequest, ProviderResponse,
};
use quill_providers::parse::suggestions_from_text;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Reply(String),
    Fail(ProviderError),
    /// Reply after a delay.
    Delayed(Duration, String),
    Hang,
}

pub(crate) struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Step>>,
    /// Answer to health checks; a reply means healthy.
    health: Step,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Replays `steps` in order; once exhausted, the last step repeats.
    pub(crate) fn new(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Self::with_health(name, steps, Step::Reply(String::new()))
    }

    pub(crate) fn with_health(name: &str, steps: Vec<Step>, health: Step) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            script: Mutex::new(steps.into()),
            health,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap_or(Step::Hang)
        } else {
            script.front().cloned().unwrap_or(Step::Hang)
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = match self.next_step() {
            Step::Reply(text) => text,
            Step::Fail(error) => return Err(error),
            Step::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
            Step::Hang => std::future::pending().await,
        };
        Ok(ProviderResponse {
            provider: self.name.clone(),
            suggestions: if request.action() == ActionKind::Completion {
                suggestions_from_text(&text)
            } else {
                Vec::new()
            },
            text,
            raw: serde_json::Value::Null,
        })
    }

    async fn check_health(&self) -> Result<Option<usize>, ProviderError> {
        match self.health.clone() {
            Step::Reply(_) => Ok(None),
            Step::Fail(error) => Err(error),
            Step::Delayed(delay, _) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

pub(crate) fn completion_request(timeout: Duration) -> ProviderRequest {
    let subject = ActionSubject::Completion {
        file: Some("main.c".to_owned()),
        cursor: CursorPosition::new(1, 1),
        selection: String::new(),
        line_prefix: "pr".to_owned(),
        surrounding: String::new(),
        known_functions: Vec::new(),
        known_variables: Vec::new(),
    };
    ProviderRequest::new(
        PromptPayload {
            action: ActionKind::Completion,
            system: String::new(),
            user: String::new(),
            subject,
        },
        CompletionOptions::for_action(ActionKind::Completion).with_timeout(timeout),
    )
}
