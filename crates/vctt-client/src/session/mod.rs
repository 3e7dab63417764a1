mod sending;


use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, VcttBackend};
use crate::models::{Message, Session, StepResponse, VcttState};

pub use sending::{SendingFlag, SendingGuard};

pub const DEGRADED_REPLY: &str = "I couldn't reach the VCTT backend, so this message was not \
processed. Check the connection and try again; your message has been kept.";
const DEFAULT_LIST_LIMIT: u32 = 50;
const TITLE_MAX_CHARS: usize = 48;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("message content is empty")]
    EmptyMessage,
    #[error("session {0} is not held by the store")]
    UnknownSession(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Pending,
    Confirmed,
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnRecord {
    pub session_id: String,
    pub user_message_id: String,
    pub status: TurnStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: String,
    pub status: TurnStatus,
    pub user_message: Message,
    pub assistant_message: Message,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Server,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub id: String,
    pub origin: SessionOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    AlreadyHydrated,
    Hydrated,
    Unhydrated { error: String },
}

#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub sessions: Vec<Session>,
    pub current_session_id: Option<String>,
    pub vctt_state: VcttState,
    pub is_sending: bool,
    pub last_turn: Option<TurnRecord>,
}

impl StoreSnapshot {
    pub fn current_session(&self) -> Option<&Session> {
        let id = self.current_session_id.as_deref()?;
        self.sessions.iter().find(|session| session.id == id)
    }
}

pub struct SessionStore<B> {
    backend: B,
    user_id: String,
    list_limit: u32,
    sessions: Vec<Session>,
    current_session_id: Option<String>,
    vctt_state: VcttState,
    last_response: Option<StepResponse>,
    last_turn: Option<TurnRecord>,
    sending: SendingFlag,
    snapshots: Arc<watch::Sender<StoreSnapshot>>,
}

impl<B> SessionStore<B>
where
    B: VcttBackend,
{
    pub fn new(backend: B, user_id: impl Into<String>) -> Self {
        let (snapshots, _) = watch::channel(StoreSnapshot::default());
        Self {
            backend,
            user_id: user_id.into(),
            list_limit: DEFAULT_LIST_LIMIT,
            sessions: Vec::new(),
            current_session_id: None,
            vctt_state: VcttState::default(),
            last_response: None,
            last_turn: None,
            sending: SendingFlag::default(),
            snapshots: Arc::new(snapshots),
        }
    }

    pub fn with_list_limit(mut self, list_limit: u32) -> Self {
        self.list_limit = list_limit.max(1);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn current_session(&self) -> Option<&Session> {
        let id = self.current_session_id.as_deref()?;
        self.sessions.iter().find(|session| session.id == id)
    }

    pub fn vctt_state(&self) -> VcttState {
        self.vctt_state
    }

    pub fn last_response(&self) -> Option<&StepResponse> {
        self.last_response.as_ref()
    }

    pub fn last_agent_logs(&self) -> &[Value] {
        self.last_response
            .as_ref()
            .map(|response| response.agent_logs.as_slice())
            .unwrap_or_default()
    }

    pub fn last_turn(&self) -> Option<&TurnRecord> {
        self.last_turn.as_ref()
    }

    pub fn is_sending(&self) -> bool {
        self.sending.is_set()
    }

    pub fn sending_flag(&self) -> SendingFlag {
        self.sending.clone()
    }

    pub async fn create_session(&mut self) -> CreatedSession {
        let (id, origin) = match self.backend.start_session(&self.user_id, "").await {
            Ok(response) => (response.session_id, SessionOrigin::Server),
            Err(err) => {
                warn!(operation = %err.operation(), "session start failed, using local id: {err}");
                (Uuid::new_v4().to_string(), SessionOrigin::Local)
            }
        };

        info!(session_id = %id, ?origin, "session created");
        self.sessions.insert(0, Session::new(id.clone()));
        self.current_session_id = Some(id.clone());
        self.publish();

        CreatedSession { id, origin }
    }

    pub async fn select_session(&mut self, reference: Session) -> SelectOutcome {
        let cached = self
            .sessions
            .iter()
            .any(|session| session.id == reference.id && session.is_hydrated());
        if cached {
            debug!(session_id = %reference.id, "selecting cached session");
            self.current_session_id = Some(reference.id);
            self.publish();
            return SelectOutcome::AlreadyHydrated;
        }

        if reference.is_hydrated() {
            self.current_session_id = Some(reference.id.clone());
            self.upsert_session(reference);
            self.publish();
            return SelectOutcome::AlreadyHydrated;
        }

        let outcome = match self.backend.session_history(&reference.id).await {
            Ok(history) => {
                let mut hydrated = reference;
                hydrated.messages = history.messages.into_iter().map(Message::from).collect();
                if let Some(created_at) = history.created_at {
                    hydrated.created_at = created_at;
                }
                info!(
                    session_id = %hydrated.id,
                    messages = hydrated.messages.len(),
                    "session hydrated"
                );
                self.current_session_id = Some(hydrated.id.clone());
                self.upsert_session(hydrated);
                SelectOutcome::Hydrated
            }
            Err(err) => {
                warn!(session_id = %reference.id, "session history fetch failed: {err}");
                self.current_session_id = Some(reference.id.clone());
                self.upsert_session(reference);
                SelectOutcome::Unhydrated {
                    error: err.to_string(),
                }
            }
        };
        self.publish();
        outcome
    }

    pub async fn send_message(&mut self, content: &str) -> Result<TurnOutcome, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let guard = self.sending.acquire(self.snapshots.clone());

        // No backend call here: the first message below mints the server session.
        if self.current_session_id.is_none() {
            let id = Uuid::new_v4().to_string();
            debug!(session_id = %id, "opening local session for first message");
            self.sessions.insert(0, Session::new(id.clone()));
            self.current_session_id = Some(id);
        }
        let local_id = self
            .current_session_id
            .clone()
            .ok_or_else(|| SessionError::UnknownSession(String::new()))?;

        let user_message = Message::user(content);
        let was_empty = {
            let session = self.session_mut(&local_id)?;
            let was_empty = session.messages.is_empty();
            if was_empty {
                session.title = title_from(content);
            }
            session.messages.push(user_message.clone());
            was_empty
        };
        self.last_turn = Some(TurnRecord {
            session_id: local_id.clone(),
            user_message_id: user_message.id.clone(),
            status: TurnStatus::Pending,
            error: None,
        });
        self.publish();

        let mut session_id = local_id.clone();
        if was_empty {
            match self.backend.start_session(&self.user_id, content).await {
                Ok(response) => {
                    self.adopt_session_id(&local_id, &response.session_id);
                    session_id = response.session_id;
                }
                Err(err) => {
                    warn!(
                        session_id = %local_id,
                        "backend session id unavailable, keeping local id: {err}"
                    );
                }
            }
        }

        let (status, assistant_message, error) = match self.backend.step(&session_id, content).await
        {
            Ok(response) => {
                let assistant_message = Message::assistant(response.response.clone());
                self.vctt_state = VcttState::from(&response.internal_state);
                info!(
                    session_id = %session_id,
                    trust = self.vctt_state.trust,
                    regulation = %self.vctt_state.regulation,
                    "turn confirmed"
                );
                self.last_response = Some(response);
                (TurnStatus::Confirmed, assistant_message, None)
            }
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    operation = %err.operation(),
                    "turn degraded: {err}"
                );
                (
                    TurnStatus::Degraded,
                    Message::assistant(DEGRADED_REPLY),
                    Some(err.to_string()),
                )
            }
        };

        self.session_mut(&session_id)?
            .messages
            .push(assistant_message.clone());
        self.last_turn = Some(TurnRecord {
            session_id: session_id.clone(),
            user_message_id: user_message.id.clone(),
            status,
            error: error.clone(),
        });
        drop(guard);
        self.publish();

        Ok(TurnOutcome {
            session_id,
            status,
            user_message,
            assistant_message,
            error,
        })
    }

    pub fn replace_state(&mut self, state: VcttState) {
        self.vctt_state = state;
        self.publish();
    }

    pub async fn refresh_sessions(&mut self) -> Result<usize, BackendError> {
        let summaries = self
            .backend
            .list_sessions(Some(&self.user_id), self.list_limit)
            .await?;

        let server_ids = summaries
            .iter()
            .map(|summary| summary.session_id.clone())
            .collect::<HashSet<_>>();
        let (local_only, known): (Vec<Session>, Vec<Session>) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|session| !server_ids.contains(&session.id));
        let mut known = known
            .into_iter()
            .map(|session| (session.id.clone(), session))
            .collect::<HashMap<_, _>>();

        let listed = summaries.len();
        let mut sessions = local_only;
        for summary in summaries {
            let mut session = Session::from(summary);
            if let Some(previous) = known.remove(&session.id) {
                session.title = previous.title;
                session.created_at = previous.created_at;
                session.messages = previous.messages;
            }
            sessions.push(session);
        }
        self.sessions = sessions;

        let current_present = self
            .current_session_id
            .as_ref()
            .is_some_and(|id| self.sessions.iter().any(|session| &session.id == id));
        if !current_present {
            self.current_session_id = self.sessions.first().map(|session| session.id.clone());
        }

        debug!(listed, held = self.sessions.len(), "session list refreshed");
        self.publish();
        Ok(listed)
    }

    pub fn delete_session(&mut self, session_id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|session| session.id != session_id);
        let removed = self.sessions.len() != before;
        if removed && self.current_session_id.as_deref() == Some(session_id) {
            self.current_session_id = self.sessions.first().map(|session| session.id.clone());
        }
        if removed {
            self.publish();
        }
        removed
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            sessions: self.sessions.clone(),
            current_session_id: self.current_session_id.clone(),
            vctt_state: self.vctt_state,
            is_sending: self.sending.is_set(),
            last_turn: self.last_turn.clone(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut Session, SessionError> {
        self.sessions
            .iter_mut()
            .find(|session| session.id == session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))
    }

    fn upsert_session(&mut self, session: Session) {
        match self.sessions.iter_mut().find(|held| held.id == session.id) {
            Some(held) => *held = session,
            None => self.sessions.insert(0, session),
        }
    }

    fn adopt_session_id(&mut self, local_id: &str, server_id: &str) {
        if local_id == server_id {
            return;
        }
        if let Some(session) = self.sessions.iter_mut().find(|session| session.id == local_id) {
            session.id = server_id.to_string();
        }
        if self.current_session_id.as_deref() == Some(local_id) {
            self.current_session_id = Some(server_id.to_string());
        }
        if let Some(turn) = self.last_turn.as_mut()
            && turn.session_id == local_id
        {
            turn.session_id = server_id.to_string();
        }
        debug!(local_id, server_id, "adopted backend session id");
    }
}

fn title_from(content: &str) -> String {
    let mut title = content.chars().take(TITLE_MAX_CHARS).collect::<String>();
    if content.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}
