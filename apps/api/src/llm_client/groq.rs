//! Groq backend (OpenAI-compatible chat completions).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, CompletionOptions, CompletionProvider, LlmError, Prompt, ProviderId};

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .filter(|c| !c.trim().is_empty())
    }
}

fn build_messages(prompt: &Prompt) -> Vec<ChatMessage<'_>> {
    let mut messages = Vec::with_capacity(2);
    if !prompt.system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: &prompt.system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &prompt.user,
    });
    messages
}

#[derive(Clone)]
pub struct GroqProvider {
    client: Client,
    api_key: String,
}

impl GroqProvider {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Groq
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let request_body = ChatRequest {
            model: &options.model,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
            messages: build_messages(prompt),
        };

        debug!("Groq request: model={}, max_tokens={}", options.model, options.max_tokens);
        let response = self
            .client
            .post(GROQ_API_URL)
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .first_content()
            .ok_or(LlmError::EmptyContent)?
            .to_string();

        Ok(Completion {
            id: parsed.id.unwrap_or_else(|| "groq-response".to_string()),
            model: parsed.model.unwrap_or_else(|| options.model.clone()),
            content,
            usage: parsed.usage,
        })
    }
}
