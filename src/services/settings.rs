use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::storage::KeyValueStore;
use super::streaming::StreamingConfig;
use crate::config::SETTINGS_STORAGE_KEY;

/// Where assistant replies come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSource {
    /// Configured backends, then the offline fallback.
    #[default]
    Live,
    /// Canned demo replies; no network.
    Simulated,
}

impl ResponseSource {
    pub fn toggled(self) -> Self {
        match self {
            ResponseSource::Live => ResponseSource::Simulated,
            ResponseSource::Simulated => ResponseSource::Live,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub response_source: ResponseSource,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(store: &dyn KeyValueStore) -> AppSettings {
        match store.get(SETTINGS_STORAGE_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings: {}", e);
                AppSettings::default()
            }),
            Ok(None) => AppSettings::default(),
            Err(e) => {
                tracing::error!("Failed to load settings: {}", e);
                AppSettings::default()
            }
        }
    }

    pub async fn save(store: &dyn KeyValueStore, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        store.set(SETTINGS_STORAGE_KEY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::Database;

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let db = Database::new_in_memory().unwrap();
        let settings = SettingsService::load(&db).await;
        assert_eq!(settings.response_source, ResponseSource::Live);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let db = Database::new_in_memory().unwrap();
        let settings = AppSettings {
            response_source: ResponseSource::Simulated,
            ..Default::default()
        };
        SettingsService::save(&db, &settings).await.unwrap();
        assert_eq!(SettingsService::load(&db).await, settings);
    }

    #[tokio::test]
    async fn test_partial_document_fills_defaults() {
        let db = Database::new_in_memory().unwrap();
        db.set_value(SETTINGS_STORAGE_KEY, r#"{"response_source":"Simulated","theme":"dark"}"#)
            .await
            .unwrap();
        let settings = SettingsService::load(&db).await;
        assert_eq!(settings.response_source, ResponseSource::Simulated);
        assert_eq!(settings.streaming, StreamingConfig::default());
    }

    #[test]
    fn test_toggle() {
        assert_eq!(ResponseSource::Live.toggled(), ResponseSource::Simulated);
        assert_eq!(ResponseSource::Simulated.toggled(), ResponseSource::Live);
    }
}
