//! Backend health model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability classification of the assistant backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No probe has finished yet.
    Checking,
    Online,
    Offline,
}

impl HealthStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Latest health snapshot, written only by the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealthState {
    pub status: HealthStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Failed probes since the last success.
    pub consecutive_failures: u32,
}

impl Default for BackendHealthState {
    fn default() -> Self {
        Self {
            status: HealthStatus::Checking,
            last_checked_at: None,
            consecutive_failures: 0,
        }
    }
}

impl BackendHealthState {
    pub fn is_online(&self) -> bool {
        self.status == HealthStatus::Online
    }
}
