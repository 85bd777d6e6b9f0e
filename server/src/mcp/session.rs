use chrono::{DateTime, Utc};
use mcp_gate::CallerIdentity;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

const SESSION_ID_LEN: usize = 32;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Messages pushed to a legacy SSE client.
pub type EventSender = mpsc::Sender<Value>;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Subject of the caller that opened the session.
    pub owner: String,
    pub protocol_version: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set for sessions opened over the SSE transport.
    pub events: Option<EventSender>,
}

/// Live protocol sessions, scoped to the caller that created them.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, owner: &CallerIdentity, events: Option<EventSender>) -> Session {
        let session = Session::new(owner, events);
        self.insert(session.clone()).await;
        session
    }

    /// Registers a session built with [`Session::new`].
    pub async fn insert(&self, session: Session) {
        tracing::info!("opened session {} for {}", session.id, session.owner);
        self.sessions.write().await.insert(session.id.clone(), session);
    }

    /// Session `id` if it exists and belongs to `caller`.
    pub async fn get(&self, id: &str, caller: &CallerIdentity) -> Option<Session> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id)?;
        if session.owner != caller.as_str() {
            tracing::warn!("{} tried to use session {} owned by another caller", caller, id);
            return None;
        }
        Some(session.clone())
    }

    pub async fn set_protocol_version(&self, id: &str, version: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.protocol_version = Some(version.to_string());
        }
    }

    /// Removes session `id` if it belongs to `caller`.
    pub async fn remove(&self, id: &str, caller: &CallerIdentity) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(session) if session.owner == caller.as_str() => {
                tracing::info!(
                    "closed session {} for {} (protocol {}, open {}s)",
                    id,
                    caller,
                    session.protocol_version.as_deref().unwrap_or("none"),
                    (Utc::now() - session.created_at).num_seconds()
                );
                sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Drops a session whose event stream went away.
    pub async fn discard(&self, id: &str) {
        if self.sessions.write().await.remove(id).is_some() {
            tracing::info!("discarded session {} after its stream closed", id);
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Guard that discards session `id` when dropped.
    pub fn guard(self: &Arc<Self>, id: &str) -> SessionGuard {
        SessionGuard {
            id: id.to_string(),
            sessions: Arc::clone(self),
        }
    }
}

impl Session {
    /// A fresh session, not yet visible in any store.
    pub fn new(owner: &CallerIdentity, events: Option<EventSender>) -> Self {
        Self {
            id: generate_session_id(),
            owner: owner.as_str().to_string(),
            protocol_version: None,
            created_at: Utc::now(),
            events,
        }
    }
}

/// Ties a session to the lifetime of its event stream.
pub struct SessionGuard {
    id: String,
    sessions: Arc<SessionStore>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let id = std::mem::take(&mut self.id);
        if let Ok(mut sessions) = self.sessions.sessions.try_write() {
            if sessions.remove(&id).is_some() {
                tracing::info!("discarded session {} after its stream closed", id);
            }
            return;
        }
        // Lock is busy; finish on the runtime if there is one
        let sessions = Arc::clone(&self.sessions);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { sessions.discard(&id).await });
        }
    }
}

fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..SESSION_ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
