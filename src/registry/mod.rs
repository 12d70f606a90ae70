//! Session-scoped thread registry.
//!
//! Every call site passes its session token explicitly; there is no ambient
//! "current thread". The table lock is held only for lookup and insert, and
//! each thread carries its own async mutex so stage execution is serialized
//! per thread rather than globally.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ChatLoopError;
use crate::graph::{StageName, AWAIT_USER_MESSAGE};
use crate::types::{FinishReason, Message, Usage};

/// Caller-supplied session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&SessionId> for SessionId {
    fn from(id: &SessionId) -> Self {
        id.clone()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque conversation thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(Uuid);

impl ThreadId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Assistant message produced by `generate_response`, not yet in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub message: Message,
    pub stop_reason: FinishReason,
    pub usage: Usage,
}

/// The last stage failure recorded against a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub stage: StageName,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Mutable state of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    /// Append-only history.
    pub messages: Vec<Message>,
    /// Stage the thread resumes at.
    pub stage: StageName,
    pub draft: Option<Draft>,
    pub last_fault: Option<FaultRecord>,
    /// Completed turns.
    pub turns: u64,
    /// Token usage summed over every completion.
    pub usage: Usage,
    /// Token usage of the turn in progress, over all of its generations.
    #[serde(default)]
    pub turn_usage: Usage,
}

impl Default for ThreadState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            stage: AWAIT_USER_MESSAGE,
            draft: None,
            last_fault: None,
            turns: 0,
            usage: Usage::default(),
            turn_usage: Usage::default(),
        }
    }
}

impl ThreadState {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_faulted(&self) -> bool {
        self.last_fault.is_some()
    }
}

/// One logical conversation, bound to exactly one session.
#[derive(Debug)]
pub struct ConversationThread {
    id: ThreadId,
    session: SessionId,
    created_at: DateTime<Utc>,
    pub(crate) state: tokio::sync::Mutex<ThreadState>,
}

impl ConversationThread {
    fn new(session: SessionId) -> Self {
        Self {
            id: ThreadId::new(),
            session,
            created_at: Utc::now(),
            state: tokio::sync::Mutex::new(ThreadState::default()),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Copy of the current state. Waits while a run holds the thread.
    pub async fn snapshot(&self) -> ThreadState {
        self.state.lock().await.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn stage(&self) -> StageName {
        self.state.lock().await.stage.clone()
    }
}

/// Binds session tokens to conversation threads.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: RwLock<HashMap<SessionId, Arc<ConversationThread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<ConversationThread>>> {
        self.threads.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<ConversationThread>>> {
        self.threads.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Thread bound to `session`, created on first use.
    ///
    /// Returns the same instance on every call for the same session.
    pub fn resolve(&self, session: &SessionId) -> Result<Arc<ConversationThread>, ChatLoopError> {
        if let Some(thread) = self.read().get(session).cloned() {
            return check_binding(session, thread);
        }

        let thread = {
            let mut threads = self.write();
            threads
                .entry(session.clone())
                .or_insert_with(|| {
                    let thread = Arc::new(ConversationThread::new(session.clone()));
                    debug!(session = %session, thread_id = %thread.id, "created conversation thread");
                    thread
                })
                .clone()
        };
        check_binding(session, thread)
    }

    /// Existing thread for `session`, without creating one.
    pub fn get(&self, session: &SessionId) -> Option<Arc<ConversationThread>> {
        self.read().get(session).cloned()
    }

    /// Drop the session binding. The thread is freed once in-flight runs
    /// release it; a later `resolve` creates a fresh thread.
    pub fn end_session(&self, session: &SessionId) -> Option<Arc<ConversationThread>> {
        let removed = self.write().remove(session);
        if let Some(thread) = &removed {
            debug!(session = %session, thread_id = %thread.id, "ended session");
        }
        removed
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Check the whole table: each thread is bound to the session that keys
    /// it and no thread appears under two sessions.
    pub fn verify_isolation(&self) -> Result<(), ChatLoopError> {
        let threads = self.read();
        let mut owners: HashMap<ThreadId, &SessionId> = HashMap::with_capacity(threads.len());

        for (session, thread) in threads.iter() {
            if thread.session != *session {
                return Err(collision(session, &thread.session, thread.id));
            }
            if let Some(other) = owners.insert(thread.id, session) {
                return Err(collision(session, other, thread.id));
            }
        }
        Ok(())
    }
}

fn check_binding(
    session: &SessionId,
    thread: Arc<ConversationThread>,
) -> Result<Arc<ConversationThread>, ChatLoopError> {
    if thread.session != *session {
        return Err(collision(session, &thread.session, thread.id));
    }
    Ok(thread)
}

fn collision(session: &SessionId, other: &SessionId, thread_id: ThreadId) -> ChatLoopError {
    error!(
        session = %session,
        other_session = %other,
        thread_id = %thread_id,
        "thread bound to two sessions"
    );
    ChatLoopError::IdentifierCollision {
        session: session.clone(),
        other_session: other.clone(),
        thread_id,
    }
}
