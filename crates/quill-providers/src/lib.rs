//! Provider adapters behind the [`ProviderAdapter`](quill_protocol::ProviderAdapter) port.
//!
//! - [`OpenAiCompatibleAdapter`] covers OpenRouter and Together
//! - [`OllamaAdapter`] talks to a local Ollama server
//! - [`LocalAdapter`] answers every action offline and never fails
//!
//! Every adapter maps its failures into
//! [`ProviderError`](quill_protocol::ProviderError) so the dispatcher can
//! treat them uniformly.

mod http;
pub mod local;
pub mod ollama;
pub mod openai;
pub mod parse;

#[cfg(test)]
mod test_support;

pub use http::{classify_status, classify_transport};
pub use local::LocalAdapter;
pub use ollama::{OLLAMA_DEFAULT_MODEL, OLLAMA_DEFAULT_URL, OllamaAdapter};
pub use openai::{OpenAiCompatibleAdapter, OpenAiCompatibleConfig};
