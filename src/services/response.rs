use thiserror::Error;

use crate::models::{AiResponse, Message, Role};
use crate::providers::{ChatMessage, ChatRequest, ChatResponse, FallbackResponder, ProviderChain};

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("Simulated provider failure")]
    SimulatedFailure,

    #[error("Generation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseOptions {
    /// Fail immediately so callers exercise their retry path.
    pub simulate_flaky: bool,
    /// Keep `failed` messages in the context (used by retry).
    pub include_failed: bool,
}

/// Map stored messages to role-tagged context, oldest first.
pub fn history_to_chat_messages(history: &[Message], include_failed: bool) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| !m.is_streaming)
        .filter(|m| include_failed || !m.failed)
        .map(|m| ChatMessage {
            role: m.role(),
            content: m.text.clone(),
        })
        .collect()
}

impl From<ChatResponse> for AiResponse {
    fn from(r: ChatResponse) -> Self {
        AiResponse {
            id: r.id,
            provider: r.provider,
            model: r.model,
            content: r.content,
            usage: r.usage,
        }
    }
}

/// Uniform reply source over the configured backends.
///
/// Backend errors never reach the caller: they end in the deterministic
/// offline reply. Only `simulate_flaky` produces an error.
#[derive(Clone, Default)]
pub struct ResponseService {
    chain: ProviderChain,
    system_prompt: Option<String>,
}

impl ResponseService {
    pub fn new(chain: ProviderChain) -> Self {
        Self {
            chain,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub async fn get_response(
        &self,
        history: &[Message],
        options: ResponseOptions,
    ) -> Result<AiResponse, ResponseError> {
        if options.simulate_flaky {
            tracing::warn!("Simulated provider failure requested");
            return Err(ResponseError::SimulatedFailure);
        }

        let messages = history_to_chat_messages(history, options.include_failed);
        tracing::debug!(
            "Requesting reply for {} context message(s), last user message: {:?}",
            messages.len(),
            messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.chars().take(50).collect::<String>())
        );

        let request = ChatRequest {
            system_prompt: self.system_prompt.clone(),
            ..ChatRequest::new(messages.clone())
        };

        match self.chain.send_message(request).await {
            Ok(response) => Ok(response.into()),
            Err(e) => {
                tracing::info!("Using offline fallback reply: {}", e);
                Ok(FallbackResponder::respond(&messages))
            }
        }
    }
}
