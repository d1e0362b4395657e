pub mod fallback;
pub mod gemini;
pub mod openrouter;
pub mod router;
pub mod simulated;
pub mod traits;
pub mod types;

use std::sync::Arc;

pub use fallback::FallbackResponder;
pub use router::ProviderChain;
pub use simulated::SimulatedResponder;
pub use traits::AiProvider;
pub use types::{ChatMessage, ChatRequest, ChatResponse, ProviderError};

use crate::config::ProviderSettings;
use crate::models::ProviderId;

/// Instantiate the HTTP adapter for one configured backend.
pub fn build_provider(settings: &ProviderSettings) -> Option<Arc<dyn AiProvider>> {
    match settings.provider {
        ProviderId::OpenRouter => Some(Arc::new(openrouter::OpenRouterProvider::new(
            settings.clone(),
        ))),
        ProviderId::Gemini => Some(Arc::new(gemini::GeminiProvider::new(settings.clone()))),
        ProviderId::LocalFallback | ProviderId::Simulated => None,
    }
}

pub fn build_chain(settings: &[ProviderSettings]) -> ProviderChain {
    let mut chain = ProviderChain::new();
    for entry in settings {
        match build_provider(entry) {
            Some(provider) => chain.register(provider),
            None => tracing::warn!("{:?} is not a network backend; ignored", entry.provider),
        }
    }
    chain
}
