use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use quill_kernel::{KernelBuilder, KernelStats, OrchestrationContext, ProviderSettings};
use quill_protocol::{
    AiContextSnapshot, AssistError, ContextPatch, CursorPosition, DiagnosisOutcome,
    EditingContext, FileRecord, GenerationOutcome, ImportError, IoError, MemorySnapshot,
    ProviderHealth, ProviderResponse, RefactorOutcome, ReviewOutcome, SearchResult, SearchScope,
};
use quill_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "quill-api")]
#[command(about = "Quill assistance API for editor front-ends")]
struct Cli {
    #[arg(long, env = "QUILL_ROOT", default_value = ".")]
    root: PathBuf,
    #[arg(long, env = "QUILL_LISTEN", default_value = "127.0.0.1:8797")]
    listen: SocketAddr,
    #[arg(long)]
    offline: bool,
    #[arg(long, env = "QUILL_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
}

#[derive(Clone)]
struct AppState {
    kernel: OrchestrationContext,
}

#[derive(Debug, Deserialize)]
struct FileUpdateRequest {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    path: String,
}

#[derive(Debug, Deserialize)]
struct CompletionRequest {
    cursor: CursorPosition,
    #[serde(default)]
    selection: String,
}

#[derive(Debug, Deserialize)]
struct RefactorRequest {
    code: String,
    #[serde(default)]
    intent: String,
}

/// Without `error_message`, the last recorded build error is diagnosed.
#[derive(Debug, Deserialize)]
struct DiagnosisRequest {
    error_message: Option<String>,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct GenerationRequest {
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    code: String,
    #[serde(default)]
    focus: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ProviderHealthResponse {
    healthy: bool,
    providers: Vec<ProviderHealth>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    scope: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<serde_json::Value>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            detail: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            detail: None,
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
            detail: None,
        }
    }
}

impl From<AssistError> for ApiError {
    fn from(error: AssistError) -> Self {
        match &error {
            AssistError::Superseded(_) => Self {
                status: StatusCode::CONFLICT,
                message: error.to_string(),
                detail: None,
            },
            AssistError::Exhausted(failure) => Self {
                status: StatusCode::BAD_GATEWAY,
                message: error.to_string(),
                detail: Some(json!({ "attempts": failure.attempts })),
            },
        }
    }
}

impl From<IoError> for ApiError {
    fn from(error: IoError) -> Self {
        match error {
            IoError::InvalidPath { .. } => Self::bad_request(error.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(error: ImportError) -> Self {
        match error {
            ImportError::Io(error) => Self::internal(error),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(detail) = self.detail {
            body["detail"] = detail;
        }
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let providers = if cli.offline {
        ProviderSettings::offline()
    } else {
        ProviderSettings::from_env()
    };
    let kernel = KernelBuilder::new(&cli.root)
        .providers(providers)
        .runtime_config(RuntimeConfig {
            attempt_timeout: cli.timeout_ms.map(Duration::from_millis),
            ..RuntimeConfig::default()
        })
        .open()
        .await?;

    let app = router(AppState {
        kernel: kernel.clone(),
    })
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, root = %cli.root.display(), "quill-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(error) = kernel.close().await {
        warn!(%error, "failed to close project cleanly");
    }
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/files", get(get_file).put(put_file))
        .route("/context", get(get_context).patch(patch_context))
        .route("/completions", post(completions))
        .route("/refactor", post(refactor))
        .route("/diagnosis", post(diagnosis))
        .route("/generation", post(generation))
        .route("/review", post(review))
        .route("/providers/health", get(provider_health))
        .route("/search", get(search))
        .route(
            "/memory",
            get(export_memory).post(import_memory).delete(clear_memory),
        )
        .route("/stats", get(stats))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "quill-api",
        "project": state.kernel.project().name,
        "providers": state.kernel.providers(),
    }))
}

async fn get_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<FileRecord>> {
    state
        .kernel
        .file(&query.path)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no file `{}` in project memory", query.path)))
}

async fn put_file(
    State(state): State<AppState>,
    Json(request): Json<FileUpdateRequest>,
) -> ApiResult<Json<FileRecord>> {
    if request.path.trim().is_empty() {
        return Err(ApiError::bad_request("path must not be empty"));
    }
    let record = state
        .kernel
        .update_file(&request.path, &request.content)
        .await?;
    Ok(Json(record))
}

async fn get_context(State(state): State<AppState>) -> Json<AiContextSnapshot> {
    Json(state.kernel.context_snapshot())
}

async fn patch_context(
    State(state): State<AppState>,
    Json(patch): Json<ContextPatch>,
) -> ApiResult<Json<EditingContext>> {
    Ok(Json(state.kernel.update_context(&patch).await?))
}

async fn completions(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> ApiResult<Json<ProviderResponse>> {
    let response = state
        .kernel
        .request_completion(request.cursor, request.selection)
        .await?;
    Ok(Json(response))
}

async fn refactor(
    State(state): State<AppState>,
    Json(request): Json<RefactorRequest>,
) -> ApiResult<Json<RefactorOutcome>> {
    if request.code.trim().is_empty() {
        return Err(ApiError::bad_request("code must not be empty"));
    }
    let outcome = state
        .kernel
        .request_refactor(request.code, request.intent)
        .await?;
    Ok(Json(outcome))
}

async fn diagnosis(
    State(state): State<AppState>,
    Json(request): Json<DiagnosisRequest>,
) -> ApiResult<Json<DiagnosisOutcome>> {
    let outcome = match request.error_message {
        Some(error_message) => {
            state
                .kernel
                .request_diagnosis(error_message, request.code)
                .await?
        }
        None => state
            .kernel
            .diagnose_last_error()
            .await?
            .ok_or_else(|| ApiError::bad_request("no error recorded; pass error_message"))?,
    };
    Ok(Json(outcome))
}

async fn generation(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<Json<GenerationOutcome>> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    Ok(Json(state.kernel.request_generation(request.prompt).await?))
}

async fn review(
    State(state): State<AppState>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<Json<ReviewOutcome>> {
    if request.code.trim().is_empty() {
        return Err(ApiError::bad_request("code must not be empty"));
    }
    let outcome = state
        .kernel
        .request_review(request.code, request.focus)
        .await?;
    Ok(Json(outcome))
}

/// Healthy when at least one provider answers; the local adapter always
/// does.
async fn provider_health(State(state): State<AppState>) -> Json<ProviderHealthResponse> {
    let providers = state.kernel.provider_health().await;
    Json(ProviderHealthResponse {
        healthy: providers.iter().any(|entry| entry.healthy),
        providers,
    })
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let scope = match query.scope.as_deref() {
        Some(scope) => scope.parse::<SearchScope>().map_err(ApiError::bad_request)?,
        None => SearchScope::All,
    };
    let results = state.kernel.search(&query.q, scope);
    Ok(Json(SearchResponse {
        query: query.q,
        results,
    }))
}

async fn export_memory(State(state): State<AppState>) -> Json<MemorySnapshot> {
    Json(state.kernel.export())
}

async fn import_memory(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    let summary = state.kernel.import(payload).await?;
    Ok(Json(json!({ "imported": summary })))
}

async fn clear_memory(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.kernel.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(State(state): State<AppState>) -> Json<KernelStats> {
    Json(state.kernel.stats())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tower::ServiceExt;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    async fn test_app(name: &str) -> Result<Router> {
        let kernel = KernelBuilder::new(unique_test_root(name)).open().await?;
        Ok(router(AppState { kernel }))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, serde_json::Value)> {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body)?).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    #[tokio::test]
    async fn file_update_then_completion_round_trip() -> Result<()> {
        let app = test_app("quill-api-complete").await?;

        let (status, health) = send(&app, Method::GET, "/healthz", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["providers"], json!(["local"]));

        let (status, record) = send(
            &app,
            Method::PUT,
            "/files",
            Some(json!({ "path": "main.c", "content": "#include <stdio.h>\nint main() {\n    pr\n}\n" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["facts"]["imports"][0]["header"], "stdio.h");

        let (status, _) = send(
            &app,
            Method::PATCH,
            "/context",
            Some(json!({ "current_file": "main.c", "cursor": { "line": 3, "column": 7 } })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);

        let (status, completion) = send(
            &app,
            Method::POST,
            "/completions",
            Some(json!({ "cursor": { "line": 3, "column": 7 } })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(completion["provider"], "local");

        let (status, found) = send(&app, Method::GET, "/search?q=main&scope=symbols", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert!(!found["results"].as_array().is_none_or(Vec::is_empty));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_import_and_bad_scope_are_client_errors() -> Result<()> {
        let app = test_app("quill-api-errors").await?;

        let (status, body) = send(
            &app,
            Method::POST,
            "/memory",
            Some(json!({ "files": "not-a-map" })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send(&app, Method::GET, "/search?q=x&scope=nope", None).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/files?path=missing.c", None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::PUT,
            "/files",
            Some(json!({ "path": ".", "content": "int x;" })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::DELETE, "/memory", None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn review_and_provider_health() -> Result<()> {
        let app = test_app("quill-api-review").await?;

        let (status, review) = send(
            &app,
            Method::POST,
            "/review",
            Some(json!({ "code": "char s[4];\nstrcpy(s, \"toolong\");\n", "focus": ["memory"] })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(review["provider"], "local");
        assert_eq!(review["issues"][0]["line"], 2);
        assert_eq!(review["issues"][0]["severity"], "warning");

        let (status, _) = send(&app, Method::POST, "/review", Some(json!({ "code": " " }))).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, health) = send(&app, Method::GET, "/providers/health", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["healthy"], true);
        assert_eq!(health["providers"][0]["provider"], "local");
        Ok(())
    }
}
