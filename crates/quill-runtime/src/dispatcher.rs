//! Sequential fallback over an ordered provider chain.
//!
//! ```text
//! Pending -> TryingProvider(0) -> Success
//!                 |  error / timeout / rejected reply
//!                 v
//!            TryingProvider(1) -> ... -> Exhausted
//! ```
//!
//! Each attempt runs under its own timeout taken from the request options.
//! Cancelling the token aborts the in-flight attempt and stops the chain.

use std::sync::Arc;
use std::time::Duration;

use quill_protocol::{
    AttemptRecord, ExhaustedFailure, ProviderAdapter, ProviderError, ProviderHealth,
    ProviderRequest, ProviderResponse,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    TryingProvider(usize),
    Success(usize),
    Exhausted,
}

/// A reply that passed acceptance, with the attempt log that led to it.
#[derive(Debug, Clone)]
pub struct Dispatched<T> {
    pub value: T,
    pub response: ProviderResponse,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchFailure {
    Exhausted(ExhaustedFailure),
    Cancelled { attempts: Vec<AttemptRecord> },
}

#[derive(Clone, Default)]
pub struct FallbackDispatcher {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl FallbackDispatcher {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|adapter| adapter.name().to_owned())
            .collect()
    }

    pub fn ends_with_local(&self) -> bool {
        self.adapters.last().is_some_and(|adapter| adapter.is_local())
    }

    /// Check every chain member in order. Never fails; each failure is
    /// reported on its own entry.
    #[instrument(skip_all, fields(chain = self.adapters.len()))]
    pub async fn check_health(&self) -> Vec<ProviderHealth> {
        let mut report = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let started = Instant::now();
            let outcome = tokio::time::timeout(HEALTH_TIMEOUT, adapter.check_health())
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::Timeout(format!(
                        "{}: no health reply within {}ms",
                        adapter.name(),
                        HEALTH_TIMEOUT.as_millis()
                    )))
                });
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let entry = match outcome {
                Ok(models) => ProviderHealth {
                    provider: adapter.name().to_owned(),
                    healthy: true,
                    models,
                    error: None,
                    elapsed_ms,
                },
                Err(error) => {
                    warn!(provider = adapter.name(), %error, "provider health check failed");
                    ProviderHealth {
                        provider: adapter.name().to_owned(),
                        healthy: false,
                        models: None,
                        error: Some(error),
                        elapsed_ms,
                    }
                }
            };
            report.push(entry);
        }
        report
    }

    pub async fn dispatch(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Dispatched<ProviderResponse>, DispatchFailure> {
        self.dispatch_with(request, cancel, |response| Ok(response.clone()))
            .await
    }

    /// Walk the chain until a reply is produced and `accept` turns it into
    /// a value. A rejected reply counts as a failed attempt.
    #[instrument(
        skip_all,
        fields(request_id = %request.request_id, action = %request.action(), chain = self.adapters.len())
    )]
    pub async fn dispatch_with<T>(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
        accept: impl Fn(&ProviderResponse) -> Result<T, ProviderError>,
    ) -> Result<Dispatched<T>, DispatchFailure> {
        let timeout = request.options.timeout();
        let mut attempts = Vec::with_capacity(self.adapters.len());
        let mut state = DispatchState::Pending;
        debug!(?state, providers = ?self.provider_names(), "dispatching");

        for (index, adapter) in self.adapters.iter().enumerate() {
            state = DispatchState::TryingProvider(index);
            debug!(?state, provider = adapter.name(), "attempting provider");
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(provider = adapter.name(), "dispatch cancelled");
                    return Err(DispatchFailure::Cancelled { attempts });
                }
                outcome = tokio::time::timeout(timeout, adapter.complete(request)) => outcome,
            };

            let result = match outcome {
                Ok(Ok(response)) => accept(&response).map(|value| (value, response)),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(ProviderError::Timeout(format!(
                    "{}: no reply within {}ms",
                    adapter.name(),
                    timeout.as_millis()
                ))),
            };
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok((value, response)) => {
                    attempts.push(AttemptRecord {
                        provider: adapter.name().to_owned(),
                        elapsed_ms,
                        error: None,
                    });
                    state = DispatchState::Success(index);
                    info!(
                        ?state,
                        provider = adapter.name(),
                        elapsed_ms,
                        failed_attempts = attempts.len() - 1,
                        "provider answered"
                    );
                    return Ok(Dispatched {
                        value,
                        response,
                        attempts,
                    });
                }
                Err(error) => {
                    warn!(
                        provider = adapter.name(),
                        kind = error.kind_name(),
                        elapsed_ms,
                        %error,
                        "provider attempt failed, falling back"
                    );
                    attempts.push(AttemptRecord {
                        provider: adapter.name().to_owned(),
                        elapsed_ms,
                        error: Some(error),
                    });
                }
            }
        }

        state = DispatchState::Exhausted;
        warn!(?state, attempts = attempts.len(), "every provider failed");
        Err(DispatchFailure::Exhausted(ExhaustedFailure { attempts }))
    }
}
