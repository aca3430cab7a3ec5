use std::fmt;

use serde::{Deserialize, Serialize};

use super::{elapsed_seconds, format_hms, SessionRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
        }
    }

    pub fn has_session(&self) -> bool {
        !matches!(self, TimerStatus::Idle)
    }

    fn for_record(record: &SessionRecord) -> Self {
        if record.is_paused {
            TimerStatus::Paused
        } else {
            TimerStatus::Running
        }
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller-owned state: the lifecycle status plus the in-memory mirror of
/// the persisted record.
#[derive(Debug, Clone, Default)]
pub struct TimerState {
    pub status: TimerStatus,
    pub record: Option<SessionRecord>,
    /// Bumped on every pause-state change; never reset.
    pub revision: u64,
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adopt(&mut self, record: SessionRecord) {
        self.status = TimerStatus::for_record(&record);
        self.record = Some(record);
    }

    pub fn reset(&mut self) {
        *self = Self {
            revision: self.revision,
            ..Self::default()
        };
    }

    /// True while `session_id` is tracked and no pause change happened since
    /// `revision` was read.
    pub fn is_current(&self, session_id: &str, revision: u64) -> bool {
        self.session_id() == Some(session_id) && self.revision == revision
    }

    pub fn session_id(&self) -> Option<&str> {
        self.record.as_ref().map(|record| record.session_id.as_str())
    }

    pub fn snapshot(&self, now: i64) -> TimerSnapshot {
        match &self.record {
            Some(record) => TimerSnapshot {
                status: self.status,
                session_id: Some(record.session_id.clone()),
                elapsed_secs: elapsed_seconds(record, now),
                is_paused: record.is_paused,
                total_paused_ms: record.paused_ms_at(now),
                last_synced_time: record.last_synced_time,
            },
            None => TimerSnapshot::default(),
        }
    }
}

/// What the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub session_id: Option<String>,
    pub elapsed_secs: u64,
    pub is_paused: bool,
    pub total_paused_ms: u64,
    pub last_synced_time: Option<i64>,
}

impl TimerSnapshot {
    pub fn display(&self) -> String {
        format_hms(self.elapsed_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    UserRequested,
    MaxDurationExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_secs: u64,
    pub total_paused_ms: u64,
    pub reason: EndReason,
    /// False when the finalized duration never reached the backend.
    pub synced: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// Non-blocking, user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum TimerEvent {
    Notice(Notice),
    SessionEnded(SessionSummary),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_survives_reset() {
        let mut state = TimerState::new();
        state.adopt(SessionRecord::new("s-1".into(), 1_000));
        state.revision += 1;
        assert!(state.is_current("s-1", 1));
        assert!(!state.is_current("s-1", 0));
        assert!(!state.is_current("s-2", 1));

        state.reset();
        assert_eq!(state.revision, 1);
        assert_eq!(state.status, TimerStatus::Idle);
        assert!(!state.is_current("s-1", 1));
    }
}
