//! LLM client factory
//!
//! Validates the requested model against the allow-list and binds the
//! caller's credential directly into a provider instance. Nothing is written
//! to process-wide state, so two sessions with different keys never see each
//! other's credential.

use super::Provider;
use super::groq::GroqProvider;
use crate::config::LlmConfig;
use crate::error::AppError;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "llama-3-3-70b-instruct";

/// Accepted model keys (lowercase) and the exact provider spelling of each.
pub const ALLOWED_MODELS: &[(&str, &str)] = &[
    ("llama-3-3-70b-instruct", "llama-3-3-70b-instruct"),
    ("gemma2-9b-it", "Gemma2-9b-It"),
];

/// Builds a provider bound to one API key.
pub trait ProviderBuilder: Send + Sync {
    fn build(&self, api_key: &str) -> Result<Arc<dyn Provider>>;
}

/// Builds [`GroqProvider`]s against a configured endpoint.
#[derive(Debug, Clone)]
pub struct GroqBuilder {
    base_url: String,
    timeout: Duration,
}

impl GroqBuilder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

impl ProviderBuilder for GroqBuilder {
    fn build(&self, api_key: &str) -> Result<Arc<dyn Provider>> {
        let provider =
            GroqProvider::with_base_url(api_key.to_string(), self.base_url.clone(), self.timeout)?;
        Ok(Arc::new(provider))
    }
}

/// A provider bound to one canonical model and temperature.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl LlmClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// Map a user-supplied model name (any case, surrounding whitespace allowed)
/// to its canonical provider spelling.
pub fn canonical_model(model: &str) -> Result<&'static str, AppError> {
    let normalized = model.trim().to_lowercase();
    ALLOWED_MODELS
        .iter()
        .find(|(key, _)| *key == normalized)
        .map(|(_, canonical)| *canonical)
        .ok_or_else(|| {
            let allowed: Vec<&str> = ALLOWED_MODELS.iter().map(|(key, _)| *key).collect();
            AppError::validation(format!(
                "Invalid model '{}'. Allowed models: {}. Use one of the exact names (case-insensitive).",
                model,
                allowed.join(", ")
            ))
        })
}

/// Construct a chat client. Performs no network I/O.
pub fn make_client(
    builder: &dyn ProviderBuilder,
    api_key: &str,
    model: &str,
    temperature: f32,
) -> Result<LlmClient, AppError> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(AppError::validation("Missing Groq API key."));
    }
    let canonical = canonical_model(model)?;

    let provider = builder
        .build(api_key)
        .map_err(|e| AppError::provider(format!("Failed to create LLM client: {}", e)))?;

    tracing::info!(
        provider = provider.name(),
        model = canonical,
        temperature,
        api_key_len = api_key.len(),
        "Created LLM client"
    );
    Ok(LlmClient::new(provider, canonical, temperature))
}
