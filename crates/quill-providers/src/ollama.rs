//! Local Ollama server adapter (`POST {base}/api/generate`, non-streaming).

use std::time::Duration;

use async_trait::async_trait;
use quill_protocol::{
    ActionKind, ProviderAdapter, ProviderError, ProviderRequest, ProviderResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::http::{build_client, classify_status, classify_transport, snippet};
use crate::parse::suggestions_from_text;

pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "codellama";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaAdapter {
    model: String,
    url: String,
    tags_url: String,
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, ProviderError> {
        let base = base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ProviderError::Unknown(format!(
                "ollama: invalid endpoint `{base_url}`"
            )));
        }
        let base = base.trim_end_matches('/');
        Ok(Self {
            model: model.into(),
            url: format!("{base}/api/generate"),
            tags_url: format!("{base}/api/tags"),
            client: build_client()?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip_all, fields(model = %self.model, action = %request.action()))]
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = GenerateRequest {
            model: &self.model,
            system: &request.prompt.system,
            prompt: &request.prompt.user,
            stream: false,
            options: GenerateOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_tokens,
            },
        };

        debug!("POST {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .timeout(request.options.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|error| classify_transport(&error, "ollama"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| classify_transport(&error, "ollama"))?;
        if !status.is_success() {
            return Err(classify_status(status, "ollama", &text));
        }

        let raw: serde_json::Value = serde_json::from_str(&text).map_err(|error| {
            ProviderError::MalformedResponse(format!(
                "ollama: {error}; ensure `stream=false` is used: {}",
                snippet(&text)
            ))
        })?;
        let decoded: GenerateResponse = serde_json::from_value(raw.clone())
            .map_err(|error| ProviderError::MalformedResponse(format!("ollama: {error}")))?;
        if request.action() == ActionKind::Completion && decoded.response.trim().is_empty() {
            return Err(ProviderError::MalformedResponse(
                "ollama: empty completion".to_owned(),
            ));
        }

        Ok(ProviderResponse {
            provider: "ollama".to_owned(),
            suggestions: if request.action() == ActionKind::Completion {
                suggestions_from_text(&decoded.response)
            } else {
                Vec::new()
            },
            text: decoded.response,
            raw,
        })
    }

    /// `GET {base}/api/tags`; counts the locally installed models.
    #[instrument(skip_all, fields(model = %self.model))]
    async fn check_health(&self) -> Result<Option<usize>, ProviderError> {
        debug!("GET {}", self.tags_url);
        let response = self
            .client
            .get(&self.tags_url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|error| classify_transport(&error, "ollama"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| classify_transport(&error, "ollama"))?;
        if !status.is_success() {
            return Err(classify_status(status, "ollama", &text));
        }
        let tags: TagList = serde_json::from_str(&text)
            .map_err(|error| ProviderError::MalformedResponse(format!("ollama: {error}")))?;
        if !tags.models.iter().any(|name| name.matches(&self.model)) {
            debug!(model = %self.model, "configured model is not installed");
        }
        Ok(Some(tags.models.len()))
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<InstalledModel>,
}

#[derive(Debug, Deserialize)]
struct InstalledModel {
    name: String,
}

impl InstalledModel {
    /// `codellama` matches `codellama:latest`.
    fn matches(&self, model: &str) -> bool {
        self.name == model || self.name.split(':').next() == Some(model)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completion_request, serve_once};
    use anyhow::Result;

    #[tokio::test]
    async fn decodes_generate_response() -> Result<()> {
        let base = serve_once("200 OK", r#"{"model":"codellama","response":"printf(\"hi\");","done":true}"#).await?;
        let adapter = OllamaAdapter::new(&base, OLLAMA_DEFAULT_MODEL)?;
        let response = adapter.complete(&completion_request()).await?;
        assert_eq!(response.text, "printf(\"hi\");");
        assert_eq!(response.suggestions.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn health_check_lists_installed_models() -> Result<()> {
        let base = serve_once("200 OK", r#"{"models":[{"name":"codellama:latest"},{"name":"qwen2.5-coder:7b"}]}"#).await?;
        let adapter = OllamaAdapter::new(&base, OLLAMA_DEFAULT_MODEL)?;
        assert_eq!(adapter.check_health().await?, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn empty_completion_is_malformed() -> Result<()> {
        let base = serve_once("200 OK", r#"{"model":"codellama","response":"","done":true}"#).await?;
        let adapter = OllamaAdapter::new(&base, OLLAMA_DEFAULT_MODEL)?;
        let error = adapter
            .complete(&completion_request())
            .await
            .expect_err("empty completion");
        assert!(matches!(error, ProviderError::MalformedResponse(_)));
        Ok(())
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() -> Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        drop(listener);

        let adapter = OllamaAdapter::new(&format!("http://{address}"), OLLAMA_DEFAULT_MODEL)?;
        let error = adapter
            .complete(&completion_request())
            .await
            .expect_err("nothing listening");
        assert!(matches!(error, ProviderError::Unreachable(_)));
        Ok(())
    }

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(OllamaAdapter::new("localhost:11434", "codellama").is_err());
    }
}
