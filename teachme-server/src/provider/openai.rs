//! OpenAI chat-completions provider implementation.

use super::{ChatTurn, ProviderError, ReplyGenerator};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use teachme_common::config::LlmConfig;

/// OpenAI API provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl OpenAiProvider {
    /// Create a provider from LLM configuration. Fails when no API key is
    /// configured.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("no LLM API key configured (set OPENAI_API_KEY)"))?;

        Ok(Self::new(
            api_key,
            &config.base_url,
            &config.model,
            config.temperature,
        ))
    }

    /// Create a provider with explicit settings.
    pub fn new(api_key: &str, base_url: &str, model: &str, temperature: f64) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        }
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate_reply(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        user_message: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ApiMessage {
            role: "system".into(),
            content: system_prompt.to_string(),
        });
        messages.extend(history.iter().map(|turn| ApiMessage {
            role: turn.role.clone(),
            content: turn.content.clone(),
        }));
        messages.push(ApiMessage {
            role: "user".into(),
            content: user_message.to_string(),
        });

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError {
                provider: "openai".into(),
                message: format!("request failed: {e}"),
                status_code: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError {
                provider: "openai".into(),
                message: format!("API error: {body}"),
                status_code: Some(status.as_u16()),
            });
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|e| ProviderError {
                provider: "openai".into(),
                message: format!("failed to parse response: {e}"),
                status_code: None,
            })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError {
                provider: "openai".into(),
                message: "response contained no choices".into(),
                status_code: None,
            })
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_api_key() {
        let config = LlmConfig::default();
        assert!(OpenAiProvider::from_config(&config).is_err());

        let config = LlmConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let provider = OpenAiProvider::from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model, "gpt-3.5-turbo");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = OpenAiProvider::new("key", "https://api.example.com/", "gpt-4o", 0.0);
        assert_eq!(provider.base_url, "https://api.example.com");
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![
                ApiMessage {
                    role: "system".into(),
                    content: "Be a conversation partner".into(),
                },
                ApiMessage {
                    role: "user".into(),
                    content: "Hello".into(),
                },
            ],
            temperature: 0.2,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("gpt-3.5-turbo"));
        assert!(json.contains("conversation partner"));
    }

    #[test]
    fn test_response_deserialization() {
        let body = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "Hi! How are you today?"}}
            ]
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.choices[0].message.content, "Hi! How are you today?");
    }
}
