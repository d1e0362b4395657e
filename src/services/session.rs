use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::response::{ResponseError, ResponseOptions, ResponseService};
use super::settings::{AppSettings, ResponseSource, SettingsService};
use super::storage::KeyValueStore;
use super::store::{ChatEvent, ChatStore};
use super::streaming::{StreamOutcome, StreamingEngine};
use super::title::TitleGenerator;
use crate::config::{AppConfig, DEFAULT_SESSION_TITLE};
use crate::models::{AiResponse, ChatSession, Message, SessionPhase};
use crate::providers::{self, SimulatedResponder};

/// In-memory bookkeeping for one session. Never persisted.
#[derive(Default)]
struct SessionRuntime {
    phase: SessionPhase,
    /// Bumped whenever a generation starts or is abandoned; writers holding
    /// an older value are stale.
    attempt: u64,
    cancel: Option<CancellationToken>,
    placeholder_id: Option<String>,
    auto_triggered: bool,
    title_requested: bool,
    temp_title: Option<String>,
    last_response: Option<AiResponse>,
}

/// Proof of ownership of a session's single generation slot.
struct Ticket {
    session_id: String,
    message_id: String,
    attempt: u64,
    cancel: CancellationToken,
}

struct ControllerInner {
    store: ChatStore,
    responder: ResponseService,
    titles: TitleGenerator,
    streaming: StreamingEngine,
    storage: Arc<dyn KeyValueStore>,
    settings: Mutex<AppSettings>,
    simulated: Mutex<SimulatedResponder>,
    runtimes: Mutex<HashMap<String, SessionRuntime>>,
}

/// Owns the conversation lifecycle of every session.
///
/// Per session: `Idle -> AwaitingResponse -> Streaming -> Idle`, or
/// `AwaitingResponse -> Failed -> Idle`. At most one generation runs per
/// session; a second send while one is in flight is rejected.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionController {
    pub fn new(
        store: ChatStore,
        responder: ResponseService,
        titles: TitleGenerator,
        storage: Arc<dyn KeyValueStore>,
        settings: AppSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                store,
                responder,
                titles,
                streaming: StreamingEngine::new(settings.streaming),
                storage,
                settings: Mutex::new(settings),
                simulated: Mutex::new(SimulatedResponder::new()),
                runtimes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wire up store, providers and settings from configuration.
    pub async fn bootstrap(config: &AppConfig, storage: Arc<dyn KeyValueStore>) -> Self {
        let settings = SettingsService::load(storage.as_ref()).await;
        let store = ChatStore::load(storage.clone()).await;
        let chain = providers::build_chain(&config.chat_providers);
        tracing::info!("Chat backends available: {:?}", chain.available());

        let responder =
            ResponseService::new(chain).with_system_prompt(settings.system_prompt.clone());
        let titles = TitleGenerator::new(
            config
                .title_provider
                .as_ref()
                .and_then(providers::build_provider),
        );
        Self::new(store, responder, titles, storage, settings)
    }

    // --- Read accessors ---

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.store.subscribe()
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.inner.store.sessions()
    }

    pub fn session(&self, session_id: &str) -> Option<ChatSession> {
        self.inner.store.session(session_id)
    }

    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.session(session_id)
            .map(|s| s.messages)
            .unwrap_or_default()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.inner.store.active_session_id()
    }

    pub fn phase(&self, session_id: &str) -> SessionPhase {
        lock(&self.inner.runtimes)
            .get(session_id)
            .map(|rt| rt.phase)
            .unwrap_or_default()
    }

    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.phase(session_id).is_busy()
    }

    pub fn last_response(&self, session_id: &str) -> Option<AiResponse> {
        lock(&self.inner.runtimes)
            .get(session_id)
            .and_then(|rt| rt.last_response.clone())
    }

    /// Raw opening text shown while the real title is being generated.
    pub fn temp_title(&self, session_id: &str) -> Option<String> {
        lock(&self.inner.runtimes)
            .get(session_id)
            .and_then(|rt| rt.temp_title.clone())
    }

    pub fn is_generating_title(&self, session_id: &str) -> bool {
        self.temp_title(session_id).is_some()
    }

    pub fn response_source(&self) -> ResponseSource {
        lock(&self.inner.settings).response_source
    }

    // --- Operations ---

    pub async fn create_session(&self, initial_text: Option<&str>) -> String {
        self.inner.store.create_session(initial_text).await
    }

    /// Bind the UI to a session and make it active.
    ///
    /// A session created from the home screen holds one user message and no
    /// reply yet; the first attach generates that reply. It runs at most once
    /// per session per process. Returns whether a generation ran.
    pub async fn attach(&self, session_id: &str) -> bool {
        if !self.inner.store.set_active_session(session_id).await {
            tracing::debug!("Attach ignored, no session {}", session_id);
            return false;
        }

        let session = match self.session(session_id) {
            Some(s) => s,
            None => return false,
        };
        if !(session.pending_first_response && session.awaits_first_response()) {
            return false;
        }

        {
            let mut runtimes = lock(&self.inner.runtimes);
            let rt = runtimes.entry(session_id.to_string()).or_default();
            if rt.auto_triggered {
                tracing::debug!("Initial reply for {} already in progress", session_id);
                return false;
            }
            rt.auto_triggered = true;
        }

        let first = session.messages[0].clone();
        tracing::info!("Generating initial reply for session {}", session_id);

        let placeholder = Message::assistant_placeholder();
        let ticket = match self.begin_generation(session_id, &placeholder.id) {
            Some(t) => t,
            None => return false,
        };
        self.request_title(session_id, &first.text);

        if !self.inner.store.append_messages(session_id, vec![placeholder]).await {
            self.abandon(&ticket);
            return false;
        }

        self.run_generation(&ticket, &[first], ResponseOptions::default())
            .await;
        true
    }

    /// Append a user message and generate the reply.
    ///
    /// Returns `false` without touching anything when the text is blank, the
    /// session is unknown, or a generation is already in flight.
    pub async fn send_message(&self, session_id: &str, text: &str, force_fail: bool) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        let session = match self.session(session_id) {
            Some(s) => s,
            None => {
                tracing::warn!("Send ignored, no session {}", session_id);
                return false;
            }
        };

        let placeholder = Message::assistant_placeholder();
        let ticket = match self.begin_generation(session_id, &placeholder.id) {
            Some(t) => t,
            None => {
                tracing::debug!("Send rejected, generation in flight for {}", session_id);
                return false;
            }
        };

        if session.messages.is_empty() || session.title == DEFAULT_SESSION_TITLE {
            self.request_title(session_id, text);
        }

        let user = Message::user(text);
        let mut context = session.messages;
        context.push(user.clone());

        if !self
            .inner
            .store
            .append_messages(session_id, vec![user, placeholder])
            .await
        {
            self.abandon(&ticket);
            return false;
        }
        if session.pending_first_response {
            self.inner
                .store
                .set_pending_first_response(session_id, false)
                .await;
        }

        let options = ResponseOptions {
            simulate_flaky: force_fail,
            include_failed: false,
        };
        self.run_generation(&ticket, &context, options).await;
        true
    }

    pub async fn retry(&self, session_id: &str, message_id: &str) -> bool {
        self.retry_with(session_id, message_id, false).await
    }

    /// Regenerate a failed assistant message in place, keeping its id.
    pub async fn retry_with(&self, session_id: &str, message_id: &str, force_fail: bool) -> bool {
        let session = match self.session(session_id) {
            Some(s) => s,
            None => return false,
        };
        let index = match session.messages.iter().position(|m| m.id == message_id) {
            Some(i) => i,
            None => return false,
        };
        let target = &session.messages[index];
        if target.is_user || !target.failed {
            tracing::debug!("Retry ignored, message {} has not failed", message_id);
            return false;
        }

        let ticket = match self.begin_generation(session_id, message_id) {
            Some(t) => t,
            None => return false,
        };

        let context: Vec<Message> = session.messages[..=index]
            .iter()
            .filter(|m| m.is_user || m.id == message_id)
            .cloned()
            .collect();

        let restarted = self.patch_if_current(&ticket, |m| {
            m.text.clear();
            m.failed = false;
            m.is_streaming = true;
        });
        if restarted.is_none() {
            self.abandon(&ticket);
            return false;
        }
        self.inner.store.flush().await;

        tracing::info!("Retrying message {} in session {}", message_id, session_id);
        let options = ResponseOptions {
            simulate_flaky: force_fail,
            include_failed: true,
        };
        self.run_generation(&ticket, &context, options).await;
        true
    }

    /// Cooperatively stop the in-flight generation.
    ///
    /// Partial text stays. A placeholder that received nothing is marked
    /// failed so it can be retried.
    pub async fn stop_generation(&self, session_id: &str) -> bool {
        let (token, placeholder) = {
            let mut runtimes = lock(&self.inner.runtimes);
            let rt = match runtimes.get_mut(session_id) {
                Some(rt) if rt.phase.is_busy() => rt,
                _ => return false,
            };
            rt.attempt += 1;
            rt.phase = SessionPhase::Idle;
            (rt.cancel.take(), rt.placeholder_id.take())
        };

        if let Some(token) = token {
            token.cancel();
        }
        tracing::debug!("Stopped generation for {}", session_id);

        if let Some(message_id) = placeholder {
            self.inner
                .store
                .update_message(session_id, &message_id, |m| {
                    m.is_streaming = false;
                    if m.text.is_empty() {
                        m.failed = true;
                    }
                })
                .await;
        }
        self.clear_pending_first_response(session_id).await;
        self.emit_phase(session_id, SessionPhase::Idle);
        true
    }

    /// The UI navigated away from the session.
    pub async fn detach(&self, session_id: &str) {
        self.stop_generation(session_id).await;
    }

    pub async fn clear_messages(&self, session_id: &str) -> bool {
        self.stop_generation(session_id).await;
        self.inner.store.update_session(session_id, Vec::new()).await
    }

    /// Silent when the id is unknown.
    pub async fn delete_session(&self, session_id: &str) {
        let runtime = lock(&self.inner.runtimes).remove(session_id);
        if let Some(token) = runtime.and_then(|rt| rt.cancel) {
            token.cancel();
        }
        self.inner.store.delete_session(session_id).await;
    }

    /// Delete every session, cancelling whatever is still generating.
    pub async fn clear_all_sessions(&self) {
        let drained: Vec<SessionRuntime> = {
            let mut runtimes = lock(&self.inner.runtimes);
            runtimes.drain().map(|(_, rt)| rt).collect()
        };
        for token in drained.into_iter().filter_map(|rt| rt.cancel) {
            token.cancel();
        }
        self.inner.store.clear_all_sessions().await;
        tracing::info!("Cleared all sessions");
    }

    /// Flip between the configured backends and canned demo replies.
    pub async fn toggle_response_source(&self) -> ResponseSource {
        let settings = {
            let mut settings = lock(&self.inner.settings);
            settings.response_source = settings.response_source.toggled();
            settings.clone()
        };
        tracing::info!("Response source is now {:?}", settings.response_source);

        if let Err(e) = SettingsService::save(self.inner.storage.as_ref(), &settings).await {
            tracing::error!("Failed to save settings: {}", e);
        }
        settings.response_source
    }

    // --- Generation cycle ---

    fn begin_generation(&self, session_id: &str, message_id: &str) -> Option<Ticket> {
        let ticket = {
            let mut runtimes = lock(&self.inner.runtimes);
            let rt = runtimes.entry(session_id.to_string()).or_default();
            if rt.phase.is_busy() {
                return None;
            }
            let cancel = CancellationToken::new();
            rt.attempt += 1;
            rt.phase = SessionPhase::AwaitingResponse;
            rt.cancel = Some(cancel.clone());
            rt.placeholder_id = Some(message_id.to_string());
            Ticket {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
                attempt: rt.attempt,
                cancel,
            }
        };
        self.emit_phase(session_id, SessionPhase::AwaitingResponse);
        Some(ticket)
    }

    /// Release the slot without touching any message.
    fn abandon(&self, ticket: &Ticket) {
        let released = self.end_if_current(ticket);
        if released {
            self.emit_phase(&ticket.session_id, SessionPhase::Idle);
        }
    }

    fn end_if_current(&self, ticket: &Ticket) -> bool {
        let mut runtimes = lock(&self.inner.runtimes);
        match runtimes.get_mut(&ticket.session_id) {
            Some(rt) if rt.attempt == ticket.attempt => {
                rt.phase = SessionPhase::Idle;
                rt.cancel = None;
                rt.placeholder_id = None;
                true
            }
            _ => false,
        }
    }

    /// Apply `f` to the ticket's message only while the ticket is current.
    /// The runtime lock is held across the store write so a concurrent stop
    /// or delete cannot interleave.
    fn patch_if_current<F>(&self, ticket: &Ticket, f: F) -> Option<Message>
    where
        F: FnOnce(&mut Message),
    {
        let runtimes = lock(&self.inner.runtimes);
        match runtimes.get(&ticket.session_id) {
            Some(rt) if rt.attempt == ticket.attempt => {
                self.inner
                    .store
                    .patch_message(&ticket.session_id, &ticket.message_id, f)
            }
            _ => None,
        }
    }

    fn stream_chunk(&self, ticket: &Ticket, partial: &str) -> bool {
        let runtimes = lock(&self.inner.runtimes);
        match runtimes.get(&ticket.session_id) {
            Some(rt) if rt.attempt == ticket.attempt => self.inner.store.apply_stream_text(
                &ticket.session_id,
                &ticket.message_id,
                partial,
            ),
            _ => false,
        }
    }

    fn transition(&self, ticket: &Ticket, phase: SessionPhase) -> bool {
        {
            let mut runtimes = lock(&self.inner.runtimes);
            match runtimes.get_mut(&ticket.session_id) {
                Some(rt) if rt.attempt == ticket.attempt => rt.phase = phase,
                _ => return false,
            }
        }
        self.emit_phase(&ticket.session_id, phase);
        true
    }

    fn emit_phase(&self, session_id: &str, phase: SessionPhase) {
        tracing::debug!("Session {} -> {:?}", session_id, phase);
        self.inner.store.emit(ChatEvent::PhaseChanged {
            session_id: session_id.to_string(),
            phase,
        });
    }

    async fn fetch_reply(
        &self,
        context: &[Message],
        options: ResponseOptions,
    ) -> Result<AiResponse, ResponseError> {
        match self.response_source() {
            ResponseSource::Live => self.inner.responder.get_response(context, options).await,
            ResponseSource::Simulated => {
                if options.simulate_flaky {
                    return Err(ResponseError::SimulatedFailure);
                }
                let prompt = context
                    .iter()
                    .rev()
                    .find(|m| m.is_user)
                    .map(|m| m.text.as_str())
                    .unwrap_or_default();
                let response = lock(&self.inner.simulated).respond(prompt);
                Ok(response)
            }
        }
    }

    async fn run_generation(&self, ticket: &Ticket, context: &[Message], options: ResponseOptions) {
        let reply = tokio::select! {
            biased;
            _ = ticket.cancel.cancelled() => Err(ResponseError::Cancelled),
            reply = self.fetch_reply(context, options) => reply,
        };

        let response = match reply {
            Ok(response) => response,
            Err(ResponseError::Cancelled) => {
                tracing::debug!("Generation for {} cancelled before reply", ticket.session_id);
                self.abandon(ticket);
                return;
            }
            Err(e) => {
                tracing::warn!("Generation for {} failed: {}", ticket.session_id, e);
                self.fail(ticket).await;
                return;
            }
        };

        {
            let mut runtimes = lock(&self.inner.runtimes);
            if let Some(rt) = runtimes.get_mut(&ticket.session_id) {
                if rt.attempt == ticket.attempt {
                    rt.last_response = Some(response.clone());
                }
            }
        }

        if !self.transition(ticket, SessionPhase::Streaming) {
            tracing::debug!("Discarding stale reply for {}", ticket.session_id);
            return;
        }

        let outcome = self
            .inner
            .streaming
            .reveal(&response.content, &ticket.cancel, |partial| {
                self.stream_chunk(ticket, partial)
            })
            .await;

        match outcome {
            StreamOutcome::Completed => self.complete(ticket, &response.content).await,
            StreamOutcome::Cancelled { revealed } => {
                tracing::debug!(
                    "Reveal for {} stopped after {} chars",
                    ticket.session_id,
                    revealed
                );
                // Still current means the placeholder vanished under us.
                self.abandon(ticket);
            }
        }
    }

    async fn complete(&self, ticket: &Ticket, content: &str) {
        let finalized = self.patch_if_current(ticket, |m| {
            m.text = content.to_string();
            m.is_streaming = false;
            m.failed = false;
        });
        if finalized.is_none() {
            self.abandon(ticket);
            return;
        }
        if !self.end_if_current(ticket) {
            return;
        }

        self.inner.store.flush().await;
        self.clear_pending_first_response(&ticket.session_id).await;
        self.emit_phase(&ticket.session_id, SessionPhase::Idle);
        tracing::debug!("Reply {} committed", ticket.message_id);
    }

    async fn fail(&self, ticket: &Ticket) {
        if !self.transition(ticket, SessionPhase::Failed) {
            return;
        }
        let marked = self.patch_if_current(ticket, Message::mark_failed);
        if marked.is_none() {
            self.abandon(ticket);
            return;
        }
        if !self.end_if_current(ticket) {
            return;
        }

        self.inner.store.flush().await;
        self.clear_pending_first_response(&ticket.session_id).await;
        self.emit_phase(&ticket.session_id, SessionPhase::Idle);
    }

    async fn clear_pending_first_response(&self, session_id: &str) {
        let pending = self
            .session(session_id)
            .is_some_and(|s| s.pending_first_response);
        if pending {
            self.inner
                .store
                .set_pending_first_response(session_id, false)
                .await;
        }
    }

    // --- Titles ---

    /// Start title generation once per session, detached from the send path.
    fn request_title(&self, session_id: &str, text: &str) {
        {
            let mut runtimes = lock(&self.inner.runtimes);
            let rt = runtimes.entry(session_id.to_string()).or_default();
            if rt.title_requested {
                return;
            }
            rt.title_requested = true;
            rt.temp_title = Some(text.to_string());
        }

        let this = self.clone();
        let session_id = session_id.to_string();
        let text = text.to_string();
        tokio::spawn(async move {
            let title = this.inner.titles.generate_title(&text).await;

            {
                let mut runtimes = lock(&this.inner.runtimes);
                if let Some(rt) = runtimes.get_mut(&session_id) {
                    rt.temp_title = None;
                }
            }

            if this.inner.store.update_session_title(&session_id, &title).await {
                tracing::info!("Session {} titled {:?}", session_id, title);
            } else {
                tracing::debug!("Session {} gone before its title resolved", session_id);
            }
        });
    }
}
