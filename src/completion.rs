//! LLM completion providers.
//!
//! The answer generator only needs `complete(prompt) -> text`. The concrete
//! provider speaks the OpenAI chat-completions protocol, which most hosted
//! and local LLM servers accept.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const BASE_URL_ENV_VAR: &str = "STORECHAT_LLM_BASE_URL";
pub const MODEL_ENV_VAR: &str = "STORECHAT_LLM_MODEL";
pub const API_KEY_ENV_VAR: &str = "STORECHAT_LLM_API_KEY";
pub const FALLBACK_API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
pub const TIMEOUT_ENV_VAR: &str = "STORECHAT_LLM_TIMEOUT_SECS";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl CompletionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();
        Self {
            base_url: get(BASE_URL_ENV_VAR)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: get(MODEL_ENV_VAR).unwrap_or(defaults.model),
            api_key: get(API_KEY_ENV_VAR)
                .or_else(|| get(FALLBACK_API_KEY_ENV_VAR)),
            timeout: get(TIMEOUT_ENV_VAR)
                .and_then(|secs| secs.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Pick a provider for `config`: HTTP when an API key is set, otherwise one
/// that reports the feature as unavailable.
pub fn build_provider(
    config: CompletionConfig,
) -> Result<Arc<dyn CompletionProvider>> {
    match config.api_key.clone() {
        Some(key) => Ok(Arc::new(OpenAiCompatible::new(config, &key)?)),
        None => Ok(Arc::new(Unconfigured)),
    }
}

/// Provider used when no API key is configured.
pub struct Unconfigured;

#[async_trait]
impl CompletionProvider for Unconfigured {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::Unavailable {
            feature: "completion",
            reason: format!("set {API_KEY_ENV_VAR} to enable answers"),
        })
    }
}

pub struct OpenAiCompatible {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiCompatible {
    pub fn new(config: CompletionConfig, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| Error::Config("invalid LLM API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            model: config.model,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatible {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "requesting completion");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Completion(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::Completion(format!("{status}: {text}")));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            Error::Completion(format!("unreadable response: {e}"))
        })?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| Error::Completion("response had no content".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
