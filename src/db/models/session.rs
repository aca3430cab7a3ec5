//! Server-side study session rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::RemoteSession;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Paused => "Paused",
            SessionStatus::Completed => "Completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub is_paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub total_paused_ms: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_duration_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StudySession> for RemoteSession {
    fn from(session: &StudySession) -> Self {
        Self {
            id: session.id.clone(),
            start_time: session.started_at.timestamp_millis(),
            is_paused: session.is_paused,
            paused_at: session.paused_at.map(|dt| dt.timestamp_millis()),
            total_paused_time_ms: session.total_paused_ms,
            last_synced_time: session.last_synced_at.map(|dt| dt.timestamp_millis()),
            end_time: session.ended_at.map(|dt| dt.timestamp_millis()),
            total_duration_seconds: session.total_duration_secs,
            is_completed: session.status == SessionStatus::Completed,
        }
    }
}
