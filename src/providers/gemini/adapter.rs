use async_trait::async_trait;
use reqwest::Client;

use super::models::*;
use crate::config::ProviderSettings;
use crate::models::{ids, ProviderId, Role, Usage};
use crate::providers::traits::AiProvider;
use crate::providers::types::{ChatMessage, ChatRequest, ChatResponse, ProviderError};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    settings: ProviderSettings,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        });
        Self { client, settings }
    }

    fn base_url(&self) -> &str {
        self.settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    /// Parse an API error response body into a user-friendly message.
    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(msg) = parsed["error"]["message"].as_str() {
                return format!("HTTP {}: {}", status.as_u16(), msg);
            }
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    fn translate_role(role: &Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }

    /// Gemini rejects empty text parts, so blank turns are left out.
    fn build_contents(messages: &[ChatMessage]) -> Vec<GeminiContent> {
        messages
            .iter()
            .filter(|msg| !msg.content.trim().is_empty())
            .map(|msg| GeminiContent {
                role: Self::translate_role(&msg.role).to_string(),
                parts: vec![GeminiPart {
                    text: Some(msg.content.clone()),
                }],
            })
            .collect()
    }

    pub(crate) fn parse_response(
        body: &str,
        requested_model: &str,
    ) -> Result<ChatResponse, ProviderError> {
        let gemini_response: GeminiResponse = serde_json::from_str(body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(error) = gemini_response.error {
            return Err(ProviderError::RequestFailed(
                error.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        // Gemini tends to end its text with newlines.
        let content = gemini_response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("No content in response".to_string()))?;

        let usage = gemini_response
            .usage_metadata
            .map(|u| {
                let prompt = u.prompt_token_count.unwrap_or(0);
                let completion = u.candidates_token_count.unwrap_or(0);
                Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: u.total_token_count.unwrap_or(prompt + completion),
                }
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            id: gemini_response
                .response_id
                .unwrap_or_else(|| ids::new_response_id("gemini")),
            provider: ProviderId::Gemini.as_str().to_string(),
            model: gemini_response
                .model_version
                .unwrap_or_else(|| requested_model.to_string()),
            content,
            usage,
        })
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn is_available(&self) -> bool {
        self.settings.has_credentials()
    }

    #[tracing::instrument(skip(self, request), fields(model = %self.settings.model))]
    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::AuthError("Gemini API key is not configured".to_string())
            })?;

        let url = format!("{}/models/{}:generateContent", self.base_url(), self.settings.model);

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        let system_instruction = request
            .system_prompt
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|prompt| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: Some(prompt.clone()),
                }],
            });

        let gemini_request = GeminiRequest {
            contents: Self::build_contents(&request.messages),
            system_instruction,
            generation_config,
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: None,
            });
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        Self::parse_response(&body, &self.settings.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_maps_to_model_role() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage {
                role: Role::Assistant,
                content: "hello".to_string(),
            },
        ];
        let contents = GeminiProvider::build_contents(&messages);
        assert_eq!(contents[0].role, "user");
        assert_eq!(contents[1].role, "model");
    }

    #[test]
    fn test_blank_turns_left_out() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::user("second"),
            ChatMessage {
                role: Role::Assistant,
                content: String::new(),
            },
        ];
        let contents = GeminiProvider::build_contents(&messages);
        assert_eq!(contents.len(), 2);
        assert!(contents.iter().all(|c| c.role == "user"));
    }

    #[test]
    fn test_parse_trims_trailing_newlines() {
        let body = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Quantum Basics\n\n"}]}}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }"#;
        let response = GeminiProvider::parse_response(body, "gemini-2.0-flash-001").unwrap();
        assert_eq!(response.content, "Quantum Basics");
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(response.model, "gemini-2.0-flash-001");
    }

    #[test]
    fn test_parse_surfaces_embedded_error() {
        let body = r#"{"error": {"message": "quota exceeded"}}"#;
        let err = GeminiProvider::parse_response(body, "m").unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed(msg) if msg == "quota exceeded"));
    }

    #[test]
    fn test_parse_rejects_blank_candidate() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "   "}]}}]}"#;
        assert!(GeminiProvider::parse_response(body, "m").is_err());
    }
}
