use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    OpenRouter,
    Gemini,
    LocalFallback,
    Simulated,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Gemini => "google-gemini",
            ProviderId::LocalFallback => "local-fallback",
            ProviderId::Simulated => "simulated",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "OpenRouter",
            ProviderId::Gemini => "Google Gemini",
            ProviderId::LocalFallback => "Offline fallback",
            ProviderId::Simulated => "Simulated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "openrouter" => Some(ProviderId::OpenRouter),
            "google-gemini" | "gemini" => Some(ProviderId::Gemini),
            "local-fallback" => Some(ProviderId::LocalFallback),
            "simulated" => Some(ProviderId::Simulated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl Usage {
    pub fn new(prompt_tokens: i64, completion_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Annotation for the UI about where a reply came from. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiResponse {
    pub id: String,
    /// Backend-reported provider name, e.g. the upstream vendor behind OpenRouter.
    pub provider: String,
    pub model: String,
    pub content: String,
    pub usage: Usage,
}

impl AiResponse {
    /// Human-readable backend label; unknown vendor names are shown as is.
    pub fn provider_label(&self) -> &str {
        ProviderId::from_str(&self.provider)
            .map(|id| id.display_name())
            .unwrap_or(self.provider.as_str())
    }
}
