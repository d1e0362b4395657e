use async_trait::async_trait;
use reqwest::Client;

use super::models::*;
use crate::config::{ProviderSettings, APP_NAME, SITE_URL};
use crate::models::{ids, ProviderId, Role, Usage};
use crate::providers::traits::AiProvider;
use crate::providers::types::{ChatMessage, ChatRequest, ChatResponse, ProviderError};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterProvider {
    client: Client,
    settings: ProviderSettings,
}

impl OpenRouterProvider {
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

    fn translate_role(role: &Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_messages(
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> Vec<OpenRouterMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);

        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            result.push(OpenRouterMessage {
                role: "system".to_string(),
                content: Some(prompt.to_string()),
            });
        }

        result.extend(messages.iter().map(|msg| OpenRouterMessage {
            role: Self::translate_role(&msg.role).to_string(),
            content: Some(msg.content.clone()),
        }));

        result
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<OpenRouterErrorResponse>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    /// Turn a 2xx body into a response, rejecting payloads without content.
    pub(crate) fn parse_response(
        body: &str,
        requested_model: &str,
    ) -> Result<ChatResponse, ProviderError> {
        let parsed: OpenRouterResponse = serde_json::from_str(body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("No content in response".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| {
                let prompt = u.prompt_tokens.unwrap_or(0);
                let completion = u.completion_tokens.unwrap_or(0);
                Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: u.total_tokens.unwrap_or(prompt + completion),
                }
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            id: parsed
                .id
                .unwrap_or_else(|| ids::new_response_id("openrouter")),
            provider: parsed
                .provider
                .unwrap_or_else(|| ProviderId::OpenRouter.as_str().to_string()),
            model: parsed.model.unwrap_or_else(|| requested_model.to_string()),
            content,
            usage,
        })
    }
}

#[async_trait]
impl AiProvider for OpenRouterProvider {
    fn provider_id(&self) -> ProviderId {
        ProviderId::OpenRouter
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
                ProviderError::AuthError("OpenRouter API key is not configured".to_string())
            })?;

        let url = format!("{}/chat/completions", self.base_url());

        let body = OpenRouterRequest {
            model: self.settings.model.clone(),
            messages: Self::build_messages(request.system_prompt.as_deref(), &request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        tracing::debug!("Sending {} messages to OpenRouter", body.messages.len());

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("HTTP-Referer", SITE_URL)
            .header("X-Title", APP_NAME)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &text,
            )));
        }

        Self::parse_response(&text, &self.settings.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_response() {
        let body = r#"{
            "id": "gen-123",
            "provider": "Featherless",
            "model": "featherless/qwerky-72b:free",
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }"#;

        let response = OpenRouterProvider::parse_response(body, "m").unwrap();
        assert_eq!(response.id, "gen-123");
        assert_eq!(response.provider, "Featherless");
        assert_eq!(response.content, "Hi there");
        assert_eq!(response.usage.total_tokens, 7);
    }

    #[test]
    fn test_parse_defaults_missing_metadata() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "ok"}}]}"#;
        let response = OpenRouterProvider::parse_response(body, "my-model").unwrap();
        assert_eq!(response.model, "my-model");
        assert_eq!(response.provider, "openrouter");
        assert_eq!(response.usage, Usage::default());
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = OpenRouterProvider::parse_response("<html>oops</html>", "m").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_rejects_empty_choices() {
        let err = OpenRouterProvider::parse_response(r#"{"choices": []}"#, "m").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_system_prompt_goes_first() {
        let messages = vec![ChatMessage::user("hello")];
        let built = OpenRouterProvider::build_messages(Some("be brief"), &messages);
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].role, "system");
        assert_eq!(built[1].role, "user");
    }

    #[test]
    fn test_unavailable_without_key() {
        let provider = OpenRouterProvider::new(ProviderSettings::openrouter(None));
        assert!(!provider.is_available());
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_error() {
        let provider = OpenRouterProvider::new(ProviderSettings::openrouter(None));
        let err = provider
            .send_message(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthError(_)));
    }

    #[tokio::test]
    #[ignore = "requires OPENROUTER_API_KEY env var"]
    async fn test_live_api() {
        let api_key = std::env::var("OPENROUTER_API_KEY").expect("OPENROUTER_API_KEY not set");
        let provider = OpenRouterProvider::new(ProviderSettings::openrouter(Some(api_key)));
        let response = provider
            .send_message(ChatRequest::new(vec![ChatMessage::user(
                "Say 'hello' and nothing else.",
            )]))
            .await
            .unwrap();
        assert!(!response.content.is_empty());
    }
}
