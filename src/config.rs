use std::time::Duration;

use crate::models::ProviderId;

pub const APP_NAME: &str = "Fluey AI";
pub const SITE_URL: &str = "https://fluey-ai.vercel.app";

/// Key under which the whole session collection is persisted.
pub const SESSIONS_STORAGE_KEY: &str = "fluey-chat-storage";
pub const SETTINGS_STORAGE_KEY: &str = "app_settings";

/// Only the most recent messages of a session are kept.
pub const MESSAGES_PER_SESSION: usize = 50;
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
pub const TITLE_MAX_CHARS: usize = 30;

pub const DEFAULT_OPENROUTER_MODEL: &str = "featherless/qwerky-72b:free";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-001";

/// One configured text-generation backend.
#[derive(Clone)]
pub struct ProviderSettings {
    pub provider: ProviderId,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl ProviderSettings {
    pub fn openrouter(api_key: Option<String>) -> Self {
        Self {
            provider: ProviderId::OpenRouter,
            api_key,
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
            base_url: None,
            timeout: None,
        }
    }

    pub fn gemini(api_key: Option<String>) -> Self {
        Self {
            provider: ProviderId::Gemini,
            api_key,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: None,
            timeout: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Chat backends in the order they are tried.
    pub chat_providers: Vec<ProviderSettings>,
    /// Backend used for session titles; `None` means local truncation only.
    pub title_provider: Option<ProviderSettings>,
}

impl AppConfig {
    /// Builds the default provider order from environment secrets.
    ///
    /// Intended for the embedding application's startup; the engine itself
    /// only ever sees the resulting explicit list.
    pub fn from_env() -> Self {
        let openrouter_key = env_any(&["OPENROUTER_API_KEY", "EXPO_PUBLIC_OPENROUTER_API_KEY"]);
        let gemini_key = env_any(&["GEMINI_API_KEY", "EXPO_PUBLIC_GEMINI_API_KEY"]);

        Self {
            chat_providers: vec![
                ProviderSettings::openrouter(openrouter_key),
                ProviderSettings::gemini(gemini_key.clone()),
            ],
            title_provider: Some(ProviderSettings::gemini(gemini_key)),
        }
    }

    /// No backends at all: every reply comes from the local fallback.
    pub fn offline() -> Self {
        Self::default()
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}
