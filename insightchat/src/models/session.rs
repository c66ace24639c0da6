//! Conversation session model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A client-held, time-boxed conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Conversation id sent with every request.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Create a session whose activity clock starts now.
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Whether the session is still usable at `now`.
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity_at < ttl
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}
