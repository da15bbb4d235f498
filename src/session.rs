use log::{ error, info, warn };
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{ Arc, Mutex, MutexGuard };

use crate::config::persona::{ Persona, PersonaId, PersonaRegistry };
use crate::history::HistoryStore;
use crate::llm::chat::{ ChatClient, ChatError };
use crate::models::chat::{ Message, MessageIdGenerator };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The exchange finished; carries the bot message that closed it.
    Replied(Message),
    Rejected(RejectReason),
}

/// Text shown in place of a reply when the dispatch failed.
pub fn render_failure(err: &ChatError) -> String {
    format!("Sorry, I ran into a problem. Details: {}", err)
}

struct SessionInner {
    history: Vec<Message>,
    state: SessionState,
}

fn lock_inner(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    // a poisoned lock still holds consistent data: every critical section is a plain push/assign
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn save_history(
    inner: &Mutex<SessionInner>,
    persist_lock: &tokio::sync::Mutex<()>,
    store: &dyn HistoryStore,
    persona: PersonaId
) {
    let _guard = persist_lock.lock().await;
    let snapshot = lock_inner(inner).history.clone();
    if let Err(e) = store.save(persona, &snapshot).await {
        error!("Failed to save history for {}: {}", persona, e);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Awaiting,
    Persisting,
    Done,
}

/// Settles an exchange whose `submit` future is dropped before it finishes,
/// so the session never stays in `AwaitingResponse`.
struct InFlight<'a> {
    session: &'a ChatSession,
    stage: Stage,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.stage == Stage::Done {
            return;
        }
        let session = self.session;
        warn!("{}: exchange abandoned before it finished", session.persona.id);
        {
            let mut inner = session.lock();
            if self.stage == Stage::Awaiting {
                let text = render_failure(&ChatError::Cancelled);
                inner.history.push(Message::bot(session.ids.next_id(), text));
            }
            inner.state = SessionState::Idle;
        }
        session.persist_detached();
    }
}

/// One open conversation with a persona.
///
/// At most one exchange is in flight. The in-memory lock is never held
/// across an await; store writes go through `persist_lock` so a save that
/// finishes after a clear cannot bring old messages back.
pub struct ChatSession {
    persona: Arc<Persona>,
    client: Arc<dyn ChatClient>,
    store: Arc<dyn HistoryStore>,
    ids: MessageIdGenerator,
    inner: Arc<Mutex<SessionInner>>,
    persist_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ChatSession {
    pub async fn open(
        persona: Arc<Persona>,
        client: Arc<dyn ChatClient>,
        store: Arc<dyn HistoryStore>
    ) -> Self {
        let history = store.load(persona.id).await;
        info!("Opened chat with {} ({} saved message(s))", persona.name, history.len());
        let last_id = history
            .iter()
            .map(|m| m.id)
            .max()
            .unwrap_or(0);
        Self {
            persona,
            client,
            store,
            ids: MessageIdGenerator::starting_after(last_id),
            inner: Arc::new(Mutex::new(SessionInner { history, state: SessionState::Idle })),
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn persona(&self) -> &Arc<Persona> {
        &self.persona
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn history(&self) -> Vec<Message> {
        self.lock().history.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        lock_inner(&self.inner)
    }

    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Rejected(RejectReason::EmptyInput);
        }

        {
            let mut inner = self.lock();
            if inner.state == SessionState::AwaitingResponse {
                warn!("{}: message rejected, a reply is still pending", self.persona.id);
                return SubmitOutcome::Rejected(RejectReason::Busy);
            }
            inner.history.push(Message::user(self.ids.next_id(), text));
            inner.state = SessionState::AwaitingResponse;
        }
        let mut flight = InFlight { session: self, stage: Stage::Awaiting };

        let reply_text = match self.client.complete(&self.persona, text).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Error in send for {}: {}", self.persona.id, e);
                render_failure(&e)
            }
        };

        let reply = Message::bot(self.ids.next_id(), reply_text);
        self.lock().history.push(reply.clone());
        flight.stage = Stage::Persisting;
        self.persist().await;
        self.lock().state = SessionState::Idle;
        flight.stage = Stage::Done;

        SubmitOutcome::Replied(reply)
    }

    /// Empties the conversation now. A reply still in flight lands in the
    /// emptied history when it arrives.
    pub async fn clear(&self) {
        let _guard = self.persist_lock.lock().await;
        self.lock().history.clear();
        if let Err(e) = self.store.clear(self.persona.id).await {
            error!("Failed to clear stored history for {}: {}", self.persona.id, e);
        }
        info!("History cleared for {}", self.persona.id);
    }

    async fn persist(&self) {
        save_history(&self.inner, &self.persist_lock, self.store.as_ref(), self.persona.id).await;
    }

    /// Saves from a task of its own; used where awaiting is not possible.
    fn persist_detached(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("{}: no runtime to save history on, it stays in memory", self.persona.id);
            return;
        };
        let inner = Arc::clone(&self.inner);
        let persist_lock = Arc::clone(&self.persist_lock);
        let store = Arc::clone(&self.store);
        let persona = self.persona.id;
        runtime.spawn(async move {
            save_history(&inner, &persist_lock, store.as_ref(), persona).await;
        });
    }
}

/// One session per persona, opened together at start-up.
pub struct ChatRooms {
    registry: Arc<PersonaRegistry>,
    client: Arc<dyn ChatClient>,
    sessions: HashMap<PersonaId, Arc<ChatSession>>,
}

impl ChatRooms {
    pub async fn open(
        registry: Arc<PersonaRegistry>,
        client: Arc<dyn ChatClient>,
        store: Arc<dyn HistoryStore>
    ) -> Self {
        let mut sessions = HashMap::new();
        for persona in registry.all() {
            let id = persona.id;
            let session = ChatSession::open(persona, Arc::clone(&client), Arc::clone(&store)).await;
            sessions.insert(id, Arc::new(session));
        }
        Self { registry, client, sessions }
    }

    pub fn registry(&self) -> &Arc<PersonaRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn ChatClient> {
        &self.client
    }

    pub fn get(&self, id: PersonaId) -> Option<Arc<ChatSession>> {
        self.sessions.get(&id).cloned()
    }

    /// Looks a session up by raw identifier; unknown ids open the default persona.
    pub fn resolve(&self, raw: &str) -> Option<Arc<ChatSession>> {
        self.get(PersonaId::resolve(raw))
    }
}
