use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use chat::{Transcript, TranscriptEntry};

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Per-session transcripts, capped at `max_sessions`.
pub struct SessionStore {
    transcripts: DashMap<Uuid, Transcript>,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            transcripts: DashMap::new(),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn append_user(&self, session: Uuid, content: &str) {
        if !self.transcripts.contains_key(&session) && self.transcripts.len() >= self.max_sessions {
            self.evict();
        }
        self.transcripts.entry(session).or_default().push_user(content);
    }

    /// No-op for a session that was evicted mid-turn.
    pub fn append_assistant(&self, session: Uuid, content: &str) {
        if let Some(mut transcript) = self.transcripts.get_mut(&session) {
            transcript.push_assistant(content);
        }
    }

    pub fn transcript(&self, session: &Uuid) -> Option<Vec<TranscriptEntry>> {
        self.transcripts.get(session).map(|t| t.entries().to_vec())
    }

    pub fn len(&self) -> usize {
        self.transcripts.len()
    }

    // Drop a quarter of the sessions to make room
    fn evict(&self) {
        let to_remove: Vec<Uuid> = self
            .transcripts
            .iter()
            .take((self.max_sessions / 4).max(1))
            .map(|entry| *entry.key())
            .collect();

        for key in &to_remove {
            self.transcripts.remove(key);
        }
        debug!(evicted = to_remove.len(), remaining = self.transcripts.len(), "Session store full");
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}
