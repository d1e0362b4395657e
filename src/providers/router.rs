use std::sync::Arc;

use super::traits::AiProvider;
use super::types::{ChatRequest, ChatResponse, ProviderError};
use crate::models::ProviderId;

/// Ordered list of backends; a request goes to the first available one and
/// falls through to the next on any error.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn AiProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        self.providers.push(provider);
    }

    pub fn with(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn available(&self) -> Vec<ProviderId> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.provider_id())
            .collect()
    }

    pub async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error = None;

        for provider in &self.providers {
            let id = provider.provider_id();
            if !provider.is_available() {
                tracing::debug!("Skipping {}: not configured", id.as_str());
                last_error = Some(ProviderError::Unavailable(id));
                continue;
            }

            match provider.send_message(request.clone()).await {
                Ok(response) => {
                    tracing::debug!(
                        "{} answered with {} chars",
                        id.as_str(),
                        response.content.len()
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!("{} failed: {}", id.as_str(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::Unavailable(ProviderId::LocalFallback)))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use crate::providers::types::ChatMessage;

    fn request() -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::user("hello")])
    }

    #[tokio::test]
    async fn test_first_available_provider_wins() {
        let primary = Arc::new(ScriptedProvider::replying(ProviderId::OpenRouter, "from A"));
        let secondary = Arc::new(ScriptedProvider::replying(ProviderId::Gemini, "from B"));
        let chain = ProviderChain::new().with(primary.clone()).with(secondary.clone());

        let response = chain.send_message(request()).await.unwrap();
        assert_eq!(response.content, "from A");
        assert_eq!(secondary.request_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_through_on_error() {
        let primary = Arc::new(ScriptedProvider::failing(ProviderId::OpenRouter));
        let secondary = Arc::new(ScriptedProvider::replying(ProviderId::Gemini, "from B"));
        let chain = ProviderChain::new().with(primary.clone()).with(secondary);

        let response = chain.send_message(request()).await.unwrap();
        assert_eq!(response.content, "from B");
        assert_eq!(primary.request_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_never_called() {
        let primary = Arc::new(ScriptedProvider::unavailable(ProviderId::OpenRouter));
        let secondary = Arc::new(ScriptedProvider::replying(ProviderId::Gemini, "from B"));
        let chain = ProviderChain::new().with(primary.clone()).with(secondary);

        assert_eq!(chain.available(), vec![ProviderId::Gemini]);
        let response = chain.send_message(request()).await.unwrap();
        assert_eq!(response.content, "from B");
        assert_eq!(primary.request_count(), 0);
    }

    #[tokio::test]
    async fn test_all_failing_returns_last_error() {
        let chain = ProviderChain::new()
            .with(Arc::new(ScriptedProvider::unavailable(ProviderId::OpenRouter)))
            .with(Arc::new(ScriptedProvider::failing(ProviderId::Gemini)));

        let err = chain.send_message(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let err = ProviderChain::new().send_message(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
