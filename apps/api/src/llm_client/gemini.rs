//! Google Gemini `generateContent` backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, CompletionOptions, CompletionProvider, LlmError, Prompt, ProviderId};

const GEMINI_API_ROOT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

fn build_request<'a>(prompt: &'a Prompt, options: &CompletionOptions) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![GeminiContent {
            role: "user",
            parts: vec![GeminiPart { text: &prompt.user }],
        }],
        generation_config: GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_tokens,
        },
        system_instruction: (!prompt.system.is_empty()).then(|| GeminiContent {
            role: "system",
            parts: vec![GeminiPart {
                text: &prompt.system,
            }],
        }),
    }
}

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let url = format!("{GEMINI_API_ROOT}/{}:generateContent", options.model);

        debug!("Gemini request: model={}, max_tokens={}", options.model, options.max_tokens);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(options.timeout)
            .json(&build_request(prompt, options))
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

        let parsed: GenerateResponse = response.json().await?;
        let content = parsed.text();
        if content.is_empty() {
            return Err(LlmError::EmptyContent);
        }

        Ok(Completion {
            id: "gemini-response".to_string(),
            model: options.model.clone(),
            content,
            usage: parsed.usage_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options() -> CompletionOptions {
        CompletionOptions {
            model: "gemini-1.5-pro".to_string(),
            temperature: 0.2,
            max_tokens: 2048,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_request_carries_system_instruction() {
        let prompt = Prompt {
            system: "rules".to_string(),
            user: "resume".to_string(),
        };
        let value = serde_json::to_value(build_request(&prompt, &options())).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(value["contents"][0]["parts"][0]["text"], "resume");
    }

    #[test]
    fn test_request_skips_empty_system() {
        let prompt = Prompt {
            system: String::new(),
            user: "resume".to_string(),
        };
        let value = serde_json::to_value(build_request(&prompt, &options())).unwrap();
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parts_are_joined() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"{\"x\""},{"text":":1}"}]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), "{\"x\":1}");
    }
}
