//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, CompletionOptions, CompletionProvider, LlmError, Prompt, ProviderId};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

impl AnthropicResponse {
    /// Concatenates every text block.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<String>()
            .trim()
            .to_string()
    }

    fn into_completion(self, content: String, fallback_model: &str) -> Completion {
        Completion {
            id: self.id.unwrap_or_else(|| "claude-response".to_string()),
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            content,
            usage: self.usage,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct ClaudeProvider {
    client: Client,
    api_key: String,
}

impl ClaudeProvider {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl CompletionProvider for ClaudeProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Claude
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let request_body = AnthropicRequest {
            model: &options.model,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system: &prompt.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &prompt.user,
            }],
        };

        debug!("Claude request: model={}, max_tokens={}", options.model, options.max_tokens);
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(options.timeout)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: AnthropicResponse = response.json().await?;
        let content = parsed.text();
        if content.is_empty() {
            return Err(LlmError::EmptyContent);
        }

        Ok(parsed.into_completion(content, &options.model))
    }
}
