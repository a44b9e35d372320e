//! Per-conversation message history.
//!
//! Only the last `max_history` exchanges (user + assistant pairs) are kept;
//! they are rendered into the system prompt of the next query.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    fn label(self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub speaker: Speaker,
    pub content: String,
}

const DEFAULT_MAX_SESSIONS: usize = 1000;

struct Session {
    history: Vec<SessionMessage>,
    last_used: u64,
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<String, Session>,
    clock: u64,
}

impl Sessions {
    /// Returns the session, creating it if needed, and marks it as most recently used.
    fn touch(&mut self, session_id: &str) -> &mut Session {
        self.clock += 1;
        let now = self.clock;
        let session = self
            .by_id
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                history: Vec::new(),
                last_used: now,
            });
        session.last_used = now;
        session
    }

    /// Drops least recently used sessions until at most `max` remain.
    fn evict(&mut self, max: usize) {
        while self.by_id.len() > max {
            let Some(oldest) = self
                .by_id
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            tracing::debug!(session_id = %oldest, "evicting idle session");
            self.by_id.remove(&oldest);
        }
    }
}

/// Sessions are kept in memory, capped at `max_sessions`; the least
/// recently used one is evicted when a new one would exceed the cap.
pub struct SessionManager {
    max_history: usize,
    max_sessions: usize,
    sessions: Mutex<Sessions>,
}

impl SessionManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            max_sessions: DEFAULT_MAX_SESSIONS,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts an empty session and returns its id.
    pub fn create_session(&self) -> String {
        let id = format!("session_{}", uuid::Uuid::new_v4().simple());
        let mut sessions = self.sessions();
        sessions.touch(&id);
        sessions.evict(self.max_sessions);
        id
    }

    /// Appends a message, creating the session if needed.
    pub fn add_message(&self, session_id: &str, speaker: Speaker, content: &str) {
        let limit = self.max_history * 2;
        let mut sessions = self.sessions();
        let history = &mut sessions.touch(session_id).history;
        history.push(SessionMessage {
            speaker,
            content: content.to_string(),
        });
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        sessions.evict(self.max_sessions);
    }

    pub fn add_exchange(&self, session_id: &str, user_message: &str, assistant_message: &str) {
        self.add_message(session_id, Speaker::User, user_message);
        self.add_message(session_id, Speaker::Assistant, assistant_message);
    }

    /// History as `"User: ..."` / `"Assistant: ..."` lines; `None` when the
    /// session is unknown or has no messages yet.
    pub fn get_conversation_history(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions();
        let history = &sessions.by_id.get(session_id)?.history;
        if history.is_empty() {
            return None;
        }
        Some(
            history
                .iter()
                .map(|m| format!("{}: {}", m.speaker.label(), m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Forgets the session. Returns whether it existed.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions().by_id.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().by_id.len()
    }
}
