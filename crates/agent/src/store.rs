use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use frontdesk_core::intake::session::ConversationSession;

pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// Keyed table of live call sessions. Injected into the orchestrator so
/// the engine never reaches for ambient state, and so deployments can
/// swap the backing implementation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session for a call, creating a fresh one on first touch.
    /// Creation must be race-free: concurrent first requests for one call
    /// SID observe a single session object.
    async fn get_or_create(&self, call_sid: &str) -> SharedSession;
    async fn exists(&self, call_sid: &str) -> bool;
    async fn remove(&self, call_sid: &str);
    /// Drop sessions idle for longer than `idle_timeout`; returns how many
    /// were evicted. Calls hold no durable state, so eviction only costs a
    /// caller mid-call their collected answers.
    async fn evict_idle(&self, idle_timeout: Duration) -> usize;
}

struct SessionEntry {
    session: SharedSession,
    last_touched: Instant,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, call_sid: &str) -> SharedSession {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(call_sid.to_string()).or_insert_with(|| SessionEntry {
            session: Arc::new(Mutex::new(ConversationSession::new(call_sid))),
            last_touched: Instant::now(),
        });
        entry.last_touched = Instant::now();
        Arc::clone(&entry.session)
    }

    async fn exists(&self, call_sid: &str) -> bool {
        self.sessions.lock().await.contains_key(call_sid)
    }

    async fn remove(&self, call_sid: &str) {
        self.sessions.lock().await.remove(call_sid);
    }

    async fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_touched.elapsed() < idle_timeout);
        before - sessions.len()
    }
}
