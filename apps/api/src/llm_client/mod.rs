/// LLM Client: the single point of entry for every completion call the pipeline makes.
///
/// ARCHITECTURAL RULE: No other module may talk to a provider API directly.
/// Stages reach a provider only through `CompletionProvider`, looked up by `ProviderId`
/// in the `ProviderRegistry` built at startup.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::Config;

pub mod claude;
pub mod gemini;
pub mod groq;
pub mod prompts;
pub mod retry;

pub use retry::{with_retry, with_timeout};

/// Client-level ceiling; each call also carries its own, shorter deadline.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider returned empty content")]
    EmptyContent,

    #[error("Provider call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl LlmError {
    /// HTTP-like status of the failure, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Api { status, .. } => Some(*status),
            LlmError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// The closed set of completion backends a stage can be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Groq,
    Claude,
    Gemini,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Groq, ProviderId::Claude, ProviderId::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Groq => "groq",
            ProviderId::Claude => "claude",
            ProviderId::Gemini => "gemini",
        }
    }

    /// Model used for every stage routed to this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderId::Groq => "llama3-70b-8192",
            ProviderId::Claude => "claude-3-sonnet-20240229",
            ProviderId::Gemini => "gemini-1.5-pro",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub id: String,
    pub model: String,
    pub content: String,
    pub usage: Option<serde_json::Value>,
}

/// One completion backend. Implementations make exactly one attempt per call;
/// retry and deadline policy belongs to the caller.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError>;
}

/// Enum-keyed table of the providers available to this process.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn CompletionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider whose API key is configured.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let mut registry = Self::new();

        if let Some(key) = &config.anthropic_api_key {
            info!("Registering claude provider (key {})", redact_key(key));
            registry.register(Arc::new(claude::ClaudeProvider::new(
                client.clone(),
                key.clone(),
            )));
        }
        if let Some(key) = &config.groq_api_key {
            info!("Registering groq provider (key {})", redact_key(key));
            registry.register(Arc::new(groq::GroqProvider::new(client.clone(), key.clone())));
        }
        if let Some(key) = &config.google_api_key {
            info!("Registering gemini provider (key {})", redact_key(key));
            registry.register(Arc::new(gemini::GeminiProvider::new(client, key.clone())));
        }

        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn CompletionProvider>> {
        self.providers.get(&id).cloned()
    }

    pub fn registered(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|id| self.providers.contains_key(id))
            .collect()
    }
}

/// Masks an API key for logs: keeps the first four and last two characters.
pub fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    match chars.len() {
        0 => "missing".to_string(),
        1..=8 => "****".to_string(),
        n => format!(
            "{}...{}",
            chars[..4].iter().collect::<String>(),
            chars[n - 2..].iter().collect::<String>()
        ),
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
