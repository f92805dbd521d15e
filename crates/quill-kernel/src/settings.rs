//! Provider chain configuration.
//!
//! The chain is resolved once, when the kernel is built: remote adapters
//! are included only when configured, and the local adapter always closes
//! the chain.

use std::sync::Arc;

use anyhow::{Context, Result};
use quill_protocol::ProviderAdapter;
use quill_providers::{
    LocalAdapter, OLLAMA_DEFAULT_MODEL, OLLAMA_DEFAULT_URL, OllamaAdapter, OpenAiCompatibleAdapter,
    OpenAiCompatibleConfig,
};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderSettings {
    #[serde(skip)]
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: Option<String>,
    #[serde(skip)]
    pub together_api_key: Option<String>,
    pub together_model: Option<String>,
    /// `None` disables the Ollama adapter.
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
}

fn first_set(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl ProviderSettings {
    /// Only the local adapter.
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ollama_disabled = first_set(&lookup, &["QUILL_DISABLE_OLLAMA"])
            .is_some_and(|value| truthy(&value));
        Self {
            openrouter_api_key: first_set(
                &lookup,
                &["QUILL_OPENROUTER_API_KEY", "OPENROUTER_API_KEY"],
            ),
            openrouter_model: first_set(&lookup, &["QUILL_OPENROUTER_MODEL"]),
            together_api_key: first_set(&lookup, &["QUILL_TOGETHER_API_KEY", "TOGETHER_API_KEY"]),
            together_model: first_set(&lookup, &["QUILL_TOGETHER_MODEL"]),
            ollama_url: (!ollama_disabled).then(|| {
                first_set(&lookup, &["QUILL_OLLAMA_URL"])
                    .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_owned())
            }),
            ollama_model: first_set(&lookup, &["QUILL_OLLAMA_MODEL"]),
        }
    }

    /// OpenRouter, Together, Ollama, then local.
    pub fn build_chain(&self) -> Result<Vec<Arc<dyn ProviderAdapter>>> {
        let mut chain: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

        if let Some(key) = &self.openrouter_api_key {
            let mut config = OpenAiCompatibleConfig::openrouter(Some(key.clone()));
            if let Some(model) = &self.openrouter_model {
                config = config.with_model(model.clone());
            }
            chain.push(Arc::new(
                OpenAiCompatibleAdapter::new(config).context("building openrouter adapter")?,
            ));
        }
        if let Some(key) = &self.together_api_key {
            let mut config = OpenAiCompatibleConfig::together(Some(key.clone()));
            if let Some(model) = &self.together_model {
                config = config.with_model(model.clone());
            }
            chain.push(Arc::new(
                OpenAiCompatibleAdapter::new(config).context("building together adapter")?,
            ));
        }
        if let Some(url) = &self.ollama_url {
            let model = self
                .ollama_model
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_MODEL.to_owned());
            chain.push(Arc::new(
                OllamaAdapter::new(url, model).context("building ollama adapter")?,
            ));
        }
        chain.push(Arc::new(LocalAdapter::new()));

        info!(
            providers = ?chain.iter().map(|adapter| adapter.name()).collect::<Vec<_>>(),
            "provider chain resolved"
        );
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn prefixed_keys_win_and_blank_values_are_ignored() {
        let settings = ProviderSettings::from_lookup(lookup(&[
            ("QUILL_OPENROUTER_API_KEY", "  "),
            ("OPENROUTER_API_KEY", "or-key"),
            ("QUILL_TOGETHER_API_KEY", "quill-key"),
            ("TOGETHER_API_KEY", "plain-key"),
            ("QUILL_OLLAMA_MODEL", "deepseek-coder"),
        ]));
        assert_eq!(settings.openrouter_api_key.as_deref(), Some("or-key"));
        assert_eq!(settings.together_api_key.as_deref(), Some("quill-key"));
        assert_eq!(settings.ollama_url.as_deref(), Some(OLLAMA_DEFAULT_URL));
        assert_eq!(settings.ollama_model.as_deref(), Some("deepseek-coder"));
    }

    #[test]
    fn chain_order_is_fixed_and_ends_local() -> Result<()> {
        let settings = ProviderSettings::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "a"),
            ("TOGETHER_API_KEY", "b"),
        ]));
        let names: Vec<_> = settings
            .build_chain()?
            .iter()
            .map(|adapter| adapter.name().to_owned())
            .collect();
        assert_eq!(names, vec!["openrouter", "together", "ollama", "local"]);

        let disabled = ProviderSettings::from_lookup(lookup(&[("QUILL_DISABLE_OLLAMA", "true")]));
        let chain = disabled.build_chain()?;
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_local());
        Ok(())
    }
}
