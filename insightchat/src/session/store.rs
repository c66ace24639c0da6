//! Conversation id management with TTL.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::kv::KeyValueStore;
use crate::error::Result;
use crate::models::ConversationSession;

const KEY_ID: &str = "conversation_id";
const KEY_CREATED: &str = "conversation_created_at";
const KEY_LAST_ACTIVITY: &str = "conversation_last_activity_at";

/// Generate a random (version 4) UUID for a new conversation.
pub fn generate_conversation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Owns the conversation id shared by every exchange.
///
/// The id lives in a [`KeyValueStore`]. When the store cannot be used the
/// session continues in memory only: continuity across restarts is lost but
/// the current exchange still gets a valid id.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    ephemeral: Mutex<Option<ConversationSession>>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            ephemeral: Mutex::new(None),
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current conversation id, minting a fresh one if none exists or the
    /// previous one expired.
    pub fn get_id(&self) -> String {
        let now = Utc::now();
        match self.load() {
            Ok(Some(session)) if session.is_live(now, self.ttl) => session.id,
            Ok(existing) => {
                if let Some(expired) = existing {
                    info!("Conversation {} expired, starting a new one", expired.id);
                }
                let session = ConversationSession::new(generate_conversation_id());
                match self.persist(&session) {
                    Ok(()) => {
                        debug!("Minted conversation {}", session.id);
                        *self.ephemeral_slot() = None;
                        session.id
                    }
                    Err(e) => {
                        warn!("Session storage unavailable, using in-memory id: {e}");
                        self.ephemeral_id(now)
                    }
                }
            }
            Err(e) => {
                warn!("Session storage unavailable, using in-memory id: {e}");
                self.ephemeral_id(now)
            }
        }
    }

    /// Record activity on the current conversation without changing its id.
    /// Does nothing when no session exists.
    pub fn refresh(&self) {
        match self.load() {
            Ok(Some(mut session)) => {
                session.touch();
                let stamp = session.last_activity_at.to_rfc3339();
                if let Err(e) = self.store.set(KEY_LAST_ACTIVITY, &stamp) {
                    warn!("Failed to refresh session activity: {e}");
                }
            }
            // Nothing stored; a store that refuses writes keeps its id in memory.
            Ok(None) => {
                if let Some(session) = self.ephemeral_slot().as_mut() {
                    session.touch();
                }
            }
            Err(e) => {
                debug!("Refreshing in-memory session, storage unavailable: {e}");
                if let Some(session) = self.ephemeral_slot().as_mut() {
                    session.touch();
                }
            }
        }
    }

    /// Switch to an id assigned by the backend. A no-op when it already matches.
    pub fn adopt(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        match self.load() {
            Ok(Some(session)) if session.id == id => self.refresh(),
            Ok(_) => {
                info!("Adopting backend conversation id {id}");
                let session = ConversationSession::new(id.to_string());
                if let Err(e) = self.persist(&session) {
                    warn!("Failed to persist adopted id: {e}");
                    *self.ephemeral_slot() = Some(session);
                }
            }
            Err(_) => {
                let mut slot = self.ephemeral_slot();
                match slot.as_mut() {
                    Some(session) if session.id == id => session.touch(),
                    _ => *slot = Some(ConversationSession::new(id.to_string())),
                }
            }
        }
    }

    /// Forget the conversation. The next [`get_id`](Self::get_id) mints a new id.
    pub fn clear(&self) -> Result<()> {
        *self.ephemeral_slot() = None;
        self.store.remove(KEY_ID)?;
        self.store.remove(KEY_CREATED)?;
        self.store.remove(KEY_LAST_ACTIVITY)?;
        info!("Conversation cleared");
        Ok(())
    }

    /// The stored session, if any, without minting or refreshing.
    pub fn current(&self) -> Option<ConversationSession> {
        match self.load() {
            Ok(Some(session)) => Some(session),
            Ok(None) | Err(_) => self.ephemeral_slot().clone(),
        }
    }

    fn load(&self) -> Result<Option<ConversationSession>> {
        let Some(id) = self.store.get(KEY_ID)? else {
            return Ok(None);
        };
        let Some(last_activity_at) = self.read_time(KEY_LAST_ACTIVITY)? else {
            // An id without a usable timestamp cannot be aged; treat it as expired.
            return Ok(Some(ConversationSession {
                id,
                created_at: DateTime::<Utc>::UNIX_EPOCH,
                last_activity_at: DateTime::<Utc>::UNIX_EPOCH,
            }));
        };
        let created_at = self.read_time(KEY_CREATED)?.unwrap_or(last_activity_at);
        Ok(Some(ConversationSession {
            id,
            created_at,
            last_activity_at,
        }))
    }

    fn read_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get(key)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    fn persist(&self, session: &ConversationSession) -> Result<()> {
        self.store.set(KEY_ID, &session.id)?;
        self.store.set(KEY_CREATED, &session.created_at.to_rfc3339())?;
        self.store
            .set(KEY_LAST_ACTIVITY, &session.last_activity_at.to_rfc3339())
    }

    fn ephemeral_id(&self, now: DateTime<Utc>) -> String {
        let mut slot = self.ephemeral_slot();
        match slot.as_ref() {
            Some(session) if session.is_live(now, self.ttl) => session.id.clone(),
            _ => {
                let session = ConversationSession::new(generate_conversation_id());
                let id = session.id.clone();
                *slot = Some(session);
                id
            }
        }
    }

    fn ephemeral_slot(&self) -> std::sync::MutexGuard<'_, Option<ConversationSession>> {
        self.ephemeral
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
