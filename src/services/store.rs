use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::storage::KeyValueStore;
use super::title::generate_basic_title;
use crate::config::{DEFAULT_SESSION_TITLE, MESSAGES_PER_SESSION, SESSIONS_STORAGE_KEY};
use crate::models::{ids, ChatSession, Message, SessionPhase};

const PERSIST_VERSION: u32 = 1;
const EVENT_CAPACITY: usize = 256;

/// Change notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SessionsChanged,
    ActiveSessionChanged(Option<String>),
    MessageUpdated { session_id: String, message: Message },
    TitleUpdated { session_id: String, title: String },
    PhaseChanged { session_id: String, phase: SessionPhase },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    #[serde(default)]
    sessions: Vec<ChatSession>,
    #[serde(default)]
    active_session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDocument {
    state: StoreState,
    #[serde(default)]
    version: u32,
}

struct StoreInner {
    state: Mutex<StoreState>,
    storage: Arc<dyn KeyValueStore>,
    // Serializes snapshot+write so a slower older write never lands last.
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ChatEvent>,
}

/// Session collection with write-through persistence.
///
/// In-memory state is authoritative; storage failures are logged and the
/// process keeps running without persistence. Every lookup goes by id, so
/// callbacks resolving out of order never hit the wrong slot.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

impl ChatStore {
    /// Load the persisted collection, reconciling messages left mid-stream
    /// by a previous run.
    pub async fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let mut state = match storage.get(SESSIONS_STORAGE_KEY).await {
            Ok(Some(json)) => match serde_json::from_str::<PersistedDocument>(&json) {
                Ok(doc) => doc.state,
                Err(e) => {
                    tracing::error!("Discarding unreadable session storage: {}", e);
                    StoreState::default()
                }
            },
            Ok(None) => StoreState::default(),
            Err(e) => {
                tracing::error!("Failed to read session storage: {}", e);
                StoreState::default()
            }
        };

        let interrupted = reconcile_interrupted(&mut state);
        if interrupted > 0 {
            tracing::warn!("Marked {} interrupted message(s) as failed", interrupted);
        }
        tracing::info!("Loaded {} session(s)", state.sessions.len());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                storage,
                persist_lock: tokio::sync::Mutex::new(()),
                events,
            }),
        };
        if interrupted > 0 {
            store.persist().await;
        }
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ChatEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn persist(&self) {
        let _guard = self.inner.persist_lock.lock().await;
        let json = {
            let state = self.lock();
            let doc = PersistedDocument {
                state: state.clone(),
                version: PERSIST_VERSION,
            };
            serde_json::to_string(&doc)
        };

        match json {
            Ok(json) => {
                if let Err(e) = self.inner.storage.set(SESSIONS_STORAGE_KEY, &json).await {
                    tracing::error!("Failed to persist sessions: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize sessions: {}", e),
        }
    }

    /// Write the current snapshot.
    pub(crate) async fn flush(&self) {
        self.persist().await;
    }

    // --- Accessors ---

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.lock().sessions.clone()
    }

    pub fn session(&self, session_id: &str) -> Option<ChatSession> {
        self.lock()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    pub fn message(&self, session_id: &str, message_id: &str) -> Option<Message> {
        self.lock()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .and_then(|s| s.find_message(message_id))
            .cloned()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.lock().active_session_id.clone()
    }

    // --- Mutations ---

    /// Allocate a session, newest first, and make it active.
    pub async fn create_session(&self, initial_text: Option<&str>) -> String {
        let now = Utc::now();
        let id = ids::new_session_id();
        let initial = initial_text.map(str::trim).filter(|t| !t.is_empty());

        let session = ChatSession {
            id: id.clone(),
            title: initial
                .map(generate_basic_title)
                .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()),
            messages: initial.map(|t| vec![Message::user(t)]).unwrap_or_default(),
            created_at: now,
            updated_at: now,
            last_viewed_at: None,
            pending_first_response: initial.is_some(),
        };

        {
            let mut state = self.lock();
            state.sessions.insert(0, session);
            state.active_session_id = Some(id.clone());
        }
        tracing::debug!("Created session {}", id);

        self.persist().await;
        self.emit(ChatEvent::SessionsChanged);
        self.emit(ChatEvent::ActiveSessionChanged(Some(id.clone())));
        id
    }

    /// Replace a session's messages, keeping only the most recent ones.
    pub async fn update_session(&self, session_id: &str, messages: Vec<Message>) -> bool {
        let updated = self.with_session(session_id, |session| {
            session.messages = keep_recent(messages);
            let now = Utc::now();
            session.updated_at = now;
            session.last_viewed_at = Some(now);
        });
        if updated.is_some() {
            self.persist().await;
            self.emit(ChatEvent::SessionsChanged);
        }
        updated.is_some()
    }

    pub async fn append_messages(&self, session_id: &str, messages: Vec<Message>) -> bool {
        let updated = self.with_session(session_id, |session| {
            let mut all = std::mem::take(&mut session.messages);
            all.extend(messages);
            session.messages = keep_recent(all);
            session.updated_at = Utc::now();
        });
        if updated.is_some() {
            self.persist().await;
            self.emit(ChatEvent::SessionsChanged);
        }
        updated.is_some()
    }

    /// Patch one message in place and persist. `None` if either id is gone.
    pub async fn update_message<F>(
        &self,
        session_id: &str,
        message_id: &str,
        f: F,
    ) -> Option<Message>
    where
        F: FnOnce(&mut Message),
    {
        let patched = self.patch_message(session_id, message_id, f)?;
        self.persist().await;
        Some(patched)
    }

    /// In-memory only text update used for every streamed chunk.
    pub fn apply_stream_text(&self, session_id: &str, message_id: &str, text: &str) -> bool {
        self.patch_message(session_id, message_id, |m| {
            m.text.clear();
            m.text.push_str(text);
        })
        .is_some()
    }

    /// In-memory patch; callers that need durability follow up with `flush`.
    pub(crate) fn patch_message<F>(
        &self,
        session_id: &str,
        message_id: &str,
        f: F,
    ) -> Option<Message>
    where
        F: FnOnce(&mut Message),
    {
        let patched = {
            let mut state = self.lock();
            let session = state.sessions.iter_mut().find(|s| s.id == session_id)?;
            let message = session.messages.iter_mut().find(|m| m.id == message_id)?;
            f(message);
            let snapshot = message.clone();
            session.updated_at = Utc::now();
            snapshot
        };
        self.emit(ChatEvent::MessageUpdated {
            session_id: session_id.to_string(),
            message: patched.clone(),
        });
        Some(patched)
    }

    pub async fn delete_session(&self, session_id: &str) -> bool {
        let (removed, active) = {
            let mut state = self.lock();
            let before = state.sessions.len();
            state.sessions.retain(|s| s.id != session_id);
            let removed = state.sessions.len() != before;

            let mut active_changed = None;
            if state.active_session_id.as_deref() == Some(session_id) {
                state.active_session_id = state.sessions.first().map(|s| s.id.clone());
                active_changed = Some(state.active_session_id.clone());
            }
            (removed, active_changed)
        };

        if !removed {
            tracing::debug!("Delete ignored, no session {}", session_id);
            return false;
        }

        tracing::debug!("Deleted session {}", session_id);
        self.persist().await;
        self.emit(ChatEvent::SessionsChanged);
        if let Some(active) = active {
            self.emit(ChatEvent::ActiveSessionChanged(active));
        }
        true
    }

    pub async fn set_active_session(&self, session_id: &str) -> bool {
        {
            let mut state = self.lock();
            if !state.sessions.iter().any(|s| s.id == session_id) {
                return false;
            }
            if state.active_session_id.as_deref() == Some(session_id) {
                return true;
            }
            state.active_session_id = Some(session_id.to_string());
        }
        self.persist().await;
        self.emit(ChatEvent::ActiveSessionChanged(Some(session_id.to_string())));
        true
    }

    /// Overwrite the title only; timestamps and messages are untouched.
    pub async fn update_session_title(&self, session_id: &str, title: &str) -> bool {
        let updated = self.with_session(session_id, |session| {
            session.title = title.to_string();
        });
        if updated.is_none() {
            return false;
        }
        self.persist().await;
        self.emit(ChatEvent::TitleUpdated {
            session_id: session_id.to_string(),
            title: title.to_string(),
        });
        true
    }

    pub async fn set_pending_first_response(&self, session_id: &str, pending: bool) -> bool {
        let updated = self.with_session(session_id, |session| {
            session.pending_first_response = pending;
        });
        if updated.is_some() {
            self.persist().await;
        }
        updated.is_some()
    }

    /// Drop every session and the stored document with it.
    pub async fn clear_all_sessions(&self) {
        {
            let mut state = self.lock();
            state.sessions.clear();
            state.active_session_id = None;
        }
        {
            let _guard = self.inner.persist_lock.lock().await;
            if let Err(e) = self.inner.storage.remove(SESSIONS_STORAGE_KEY).await {
                tracing::error!("Failed to remove stored sessions: {}", e);
            }
        }
        self.emit(ChatEvent::SessionsChanged);
        self.emit(ChatEvent::ActiveSessionChanged(None));
    }

    fn with_session<R, F>(&self, session_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut ChatSession) -> R,
    {
        let mut state = self.lock();
        state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .map(f)
    }
}

fn keep_recent(mut messages: Vec<Message>) -> Vec<Message> {
    if messages.len() > MESSAGES_PER_SESSION {
        messages.drain(..messages.len() - MESSAGES_PER_SESSION);
    }
    messages
}

/// A message still streaming at load time belongs to a run that died.
fn reconcile_interrupted(state: &mut StoreState) -> usize {
    let mut count = 0;
    for session in &mut state.sessions {
        for message in session.messages.iter_mut().filter(|m| m.is_streaming) {
            message.mark_failed();
            count += 1;
        }
        // The failed placeholder is now the retry affordance.
        if session.pending_first_response && !session.awaits_first_response() {
            session.pending_first_response = false;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::services::database::Database;
    use crate::services::storage::testing::BrokenStorage;

    async fn store() -> (ChatStore, Arc<Database>) {
        let db = Arc::new(Database::new_in_memory().unwrap());
        (ChatStore::load(db.clone()).await, db)
    }

    fn assistant(text: &str) -> Message {
        Message {
            text: text.to_string(),
            is_streaming: false,
            ..Message::assistant_placeholder()
        }
    }

    #[tokio::test]
    async fn test_create_session_with_initial_text() {
        let (store, _) = store().await;
        let id = store.create_session(Some("Explain quantum computing")).await;

        let session = store.session(&id).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert!(session.messages[0].is_user);
        assert_eq!(session.title, "Explain quantum computing");
        assert!(session.pending_first_response);
        assert_eq!(store.active_session_id(), Some(id));
    }

    #[tokio::test]
    async fn test_create_empty_session_uses_default_title() {
        let (store, _) = store().await;
        let id = store.create_session(None).await;
        let session = store.session(&id).unwrap();
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert!(session.messages.is_empty());
        assert!(!session.pending_first_response);
    }

    #[tokio::test]
    async fn test_newest_session_first() {
        let (store, _) = store().await;
        let first = store.create_session(None).await;
        let second = store.create_session(None).await;
        let order: Vec<String> = store.sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(order, vec![second, first]);
    }

    #[tokio::test]
    async fn test_update_session_is_idempotent() {
        let (store, _) = store().await;
        let id = store.create_session(Some("hello")).await;
        let mut messages = store.session(&id).unwrap().messages;
        messages.push(assistant("hi!"));

        store.update_session(&id, messages.clone()).await;
        let once = store.session(&id).unwrap();
        store.update_session(&id, messages.clone()).await;
        let twice = store.session(&id).unwrap();

        assert_eq!(once.messages, twice.messages);
        assert_eq!(twice.messages.len(), 2);
        assert!(twice.updated_at >= once.updated_at);
        assert_eq!(once.created_at, twice.created_at);
    }

    #[tokio::test]
    async fn test_update_session_keeps_recent_messages() {
        let (store, _) = store().await;
        let id = store.create_session(None).await;
        let messages: Vec<Message> = (0..60).map(|i| Message::user(format!("m{}", i))).collect();

        store.update_session(&id, messages).await;
        let kept = store.session(&id).unwrap().messages;
        assert_eq!(kept.len(), MESSAGES_PER_SESSION);
        assert_eq!(kept[0].text, "m10");
        assert_eq!(kept[49].text, "m59");
    }

    #[tokio::test]
    async fn test_update_unknown_session_is_noop() {
        let (store, _) = store().await;
        assert!(!store.update_session("session_missing", vec![]).await);
        assert!(!store.update_session_title("session_missing", "x").await);
    }

    #[tokio::test]
    async fn test_delete_only_session_clears_active() {
        let (store, _) = store().await;
        let id = store.create_session(Some("only one")).await;
        assert!(store.delete_session(&id).await);
        assert!(store.active_session_id().is_none());
        assert!(store.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_active_moves_to_most_recent() {
        let (store, _) = store().await;
        let older = store.create_session(None).await;
        let newer = store.create_session(None).await;
        let newest = store.create_session(None).await;

        store.delete_session(&newest).await;
        assert_eq!(store.active_session_id(), Some(newer.clone()));

        store.set_active_session(&older).await;
        store.delete_session(&newer).await;
        assert_eq!(store.active_session_id(), Some(older));
    }

    #[tokio::test]
    async fn test_delete_missing_session_is_silent() {
        let (store, _) = store().await;
        let id = store.create_session(None).await;
        assert!(!store.delete_session("session_0_0").await);
        assert_eq!(store.active_session_id(), Some(id));
    }

    #[tokio::test]
    async fn test_update_title_touches_only_title() {
        let (store, _) = store().await;
        let id = store.create_session(Some("hello there")).await;
        let before = store.session(&id).unwrap();

        store.update_session_title(&id, "Greetings").await;
        let after = store.session(&id).unwrap();

        assert_eq!(after.title, "Greetings");
        assert_eq!(after.messages, before.messages);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn test_update_message_by_id() {
        let (store, _) = store().await;
        let id = store.create_session(Some("hi")).await;
        let placeholder = Message::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();
        store.append_messages(&id, vec![placeholder]).await;

        let patched = store
            .update_message(&id, &placeholder_id, |m| {
                m.text = "done".to_string();
                m.is_streaming = false;
            })
            .await
            .unwrap();
        assert_eq!(patched.text, "done");
        assert!(store.update_message(&id, "msg_stale", |_| {}).await.is_none());
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let (store, db) = store().await;
        let id = store.create_session(Some("persist me")).await;
        store.update_session_title(&id, "Persisted").await;

        let reloaded = ChatStore::load(db).await;
        let session = reloaded.session(&id).unwrap();
        assert_eq!(session.title, "Persisted");
        assert_eq!(session.messages[0].text, "persist me");
        assert_eq!(reloaded.active_session_id(), Some(id));
    }

    #[tokio::test]
    async fn test_reload_marks_streaming_messages_failed() {
        let (store, db) = store().await;
        let id = store.create_session(Some("crash during reply")).await;
        let placeholder = Message::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();
        store.append_messages(&id, vec![placeholder]).await;

        let reloaded = ChatStore::load(db).await;
        let message = reloaded.message(&id, &placeholder_id).unwrap();
        assert!(message.failed);
        assert!(!message.is_streaming);
        assert!(!reloaded.session(&id).unwrap().pending_first_response);
    }

    #[tokio::test]
    async fn test_reload_keeps_pending_first_response_without_placeholder() {
        let (store, db) = store().await;
        let id = store.create_session(Some("restart before reply")).await;

        let reloaded = ChatStore::load(db).await;
        assert!(reloaded.session(&id).unwrap().pending_first_response);
    }

    #[tokio::test]
    async fn test_load_tolerates_unknown_and_missing_fields() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let json = r#"{
            "state": {
                "sessions": [{
                    "id": "session_1",
                    "title": "Old",
                    "createdAt": 1700000000000,
                    "updatedAt": 1700000000000,
                    "pinned": true,
                    "messages": [{"id": "msg_1_1", "text": "hi", "isUser": true}]
                }],
                "activeSessionId": "session_1",
                "theme": "dark"
            },
            "version": 0
        }"#;
        db.set_value(SESSIONS_STORAGE_KEY, json).await.unwrap();

        let store = ChatStore::load(db).await;
        let session = store.session("session_1").unwrap();
        assert_eq!(session.messages.len(), 1);
        assert!(session.last_viewed_at.is_none());
        assert!(!session.pending_first_response);
    }

    #[tokio::test]
    async fn test_corrupt_storage_starts_empty() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        db.set_value(SESSIONS_STORAGE_KEY, "{not json").await.unwrap();
        let store = ChatStore::load(db).await;
        assert!(store.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_memory_authoritative() {
        let storage = Arc::new(BrokenStorage::default());
        let store = ChatStore::load(storage.clone()).await;

        let id = store.create_session(Some("still works")).await;
        store.update_session_title(&id, "Offline").await;

        assert_eq!(store.session(&id).unwrap().title, "Offline");
        assert!(storage.writes.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_clear_all_sessions() {
        let (store, db) = store().await;
        store.create_session(None).await;
        store.create_session(Some("x")).await;
        store.clear_all_sessions().await;
        assert!(store.sessions().is_empty());
        assert!(store.active_session_id().is_none());
        assert!(db.get_value(SESSIONS_STORAGE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_events_published() {
        let (store, _) = store().await;
        let mut rx = store.subscribe();
        let id = store.create_session(None).await;
        store.update_session_title(&id, "Named").await;

        assert_eq!(rx.recv().await.unwrap(), ChatEvent::SessionsChanged);
        assert_eq!(rx.recv().await.unwrap(), ChatEvent::ActiveSessionChanged(Some(id.clone())));
        assert_eq!(
            rx.recv().await.unwrap(),
            ChatEvent::TitleUpdated {
                session_id: id,
                title: "Named".to_string()
            }
        );
    }
}
