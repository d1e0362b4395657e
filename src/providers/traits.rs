use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse, ProviderError};
use crate::models::ProviderId;

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Whether the backend has what it needs (credentials, endpoint) to be
    /// called at all. Unavailable providers are skipped without a request.
    fn is_available(&self) -> bool;

    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}
