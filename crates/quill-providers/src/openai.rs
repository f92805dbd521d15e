//! OpenAI-compatible chat completions, used for OpenRouter and Together.

use std::time::Duration;

use async_trait::async_trait;
use quill_protocol::{
    ActionKind, ProviderAdapter, ProviderError, ProviderRequest, ProviderResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::http::{build_client, classify_status, classify_transport, snippet};
use crate::parse::suggestions_from_text;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_DEFAULT_MODEL: &str = "qwen/qwen2.5-coder-7b-instruct";
pub const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
pub const TOGETHER_DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiCompatibleConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Sent with every request, e.g. attribution headers.
    pub extra_headers: Vec<(String, String)>,
}

impl OpenAiCompatibleConfig {
    pub fn openrouter(api_key: Option<String>) -> Self {
        Self {
            name: "openrouter".to_owned(),
            base_url: OPENROUTER_BASE_URL.to_owned(),
            model: OPENROUTER_DEFAULT_MODEL.to_owned(),
            api_key,
            extra_headers: vec![
                (
                    "HTTP-Referer".to_owned(),
                    "https://github.com/quill-editor/quill".to_owned(),
                ),
                ("X-Title".to_owned(), "Quill".to_owned()),
            ],
        }
    }

    pub fn together(api_key: Option<String>) -> Self {
        Self {
            name: "together".to_owned(),
            base_url: TOGETHER_BASE_URL.to_owned(),
            model: TOGETHER_DEFAULT_MODEL.to_owned(),
            api_key,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub struct OpenAiCompatibleAdapter {
    config: OpenAiCompatibleConfig,
    url: String,
    models_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, ProviderError> {
        let base = config.base_url.trim_end_matches('/').to_owned();
        Ok(Self {
            url: format!("{base}/chat/completions"),
            models_url: format!("{base}/models"),
            config,
            client: build_client()?,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn has_key(&self) -> bool {
        self.api_key().is_some()
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    fn require_key(&self) -> Result<&str, ProviderError> {
        self.api_key().ok_or_else(|| {
            ProviderError::Unauthorized(format!("{}: no API key configured", self.config.name))
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(
        skip_all,
        fields(provider = %self.config.name, model = %self.config.model, action = %request.action())
    )]
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let api_key = self.require_key()?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt.user,
                },
            ],
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
        };

        debug!("POST {}", self.url);
        let mut builder = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .timeout(request.options.timeout())
            .json(&body);
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| classify_transport(&error, &self.config.name))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| classify_transport(&error, &self.config.name))?;
        if !status.is_success() {
            return Err(classify_status(status, &self.config.name, &text));
        }

        let raw: serde_json::Value = serde_json::from_str(&text).map_err(|error| {
            ProviderError::MalformedResponse(format!(
                "{}: {error}: {}",
                self.config.name,
                snippet(&text)
            ))
        })?;
        let decoded: ChatResponse = serde_json::from_value(raw.clone()).map_err(|error| {
            ProviderError::MalformedResponse(format!("{}: {error}", self.config.name))
        })?;
        let content = decoded
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!(
                    "{}: response has no choices[0].message.content",
                    self.config.name
                ))
            })?;
        if request.action() == ActionKind::Completion && content.trim().is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "{}: empty completion",
                self.config.name
            )));
        }

        Ok(ProviderResponse {
            provider: self.config.name.clone(),
            suggestions: if request.action() == ActionKind::Completion {
                suggestions_from_text(&content)
            } else {
                Vec::new()
            },
            text: content,
            raw,
        })
    }

    /// `GET {base}/models`; counts the advertised models.
    #[instrument(skip_all, fields(provider = %self.config.name))]
    async fn check_health(&self) -> Result<Option<usize>, ProviderError> {
        let api_key = self.require_key()?;
        debug!("GET {}", self.models_url);
        let mut builder = self
            .client
            .get(&self.models_url)
            .bearer_auth(api_key)
            .timeout(HEALTH_TIMEOUT);
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|error| classify_transport(&error, &self.config.name))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| classify_transport(&error, &self.config.name))?;
        if !status.is_success() {
            return Err(classify_status(status, &self.config.name, &text));
        }
        let models: ModelList = serde_json::from_str(&text).map_err(|error| {
            ProviderError::MalformedResponse(format!("{}: {error}", self.config.name))
        })?;
        Ok(Some(models.data.len()))
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
