use thiserror::Error;

use super::TimerStatus;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("cannot {operation} while the timer is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: TimerStatus,
    },

    #[error("another timer operation is already in progress")]
    Busy,

    #[error("backend unreachable: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("local session data is corrupt: {0}")]
    CorruptRecord(String),

    #[error("backend has no record of session {session_id}")]
    Conflict { session_id: String },

    #[error("session exceeded the maximum duration of {limit_secs} seconds")]
    DurationExceeded { limit_secs: u64 },

    #[error("local session store failed: {0}")]
    Storage(#[source] anyhow::Error),

    #[error(
        "session {session_id} ended locally but its final duration ({duration_secs}s) \
         did not reach the server: {source}"
    )]
    UnsyncedEnd {
        session_id: String,
        duration_secs: u64,
        #[source]
        source: anyhow::Error,
    },
}

impl TimerError {
    /// Message shown to the user for this failure.
    pub fn notice_message(&self) -> String {
        match self {
            TimerError::Backend(_) => "Failed to reach the server".into(),
            TimerError::CorruptRecord(_) => "Failed to restore session data".into(),
            TimerError::Conflict { .. } => {
                "Session was not found on the server; re-syncing local timer".into()
            }
            TimerError::DurationExceeded { .. } => {
                "Session exceeded maximum duration. Please start a new session.".into()
            }
            TimerError::UnsyncedEnd { duration_secs, .. } => format!(
                "Session ended, but its duration ({}) could not be saved",
                super::format_hms(*duration_secs)
            ),
            other => other.to_string(),
        }
    }
}
