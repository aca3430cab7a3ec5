//! Port to the authoritative session store.
//!
//! The timer issues exactly three calls: create, partial patch and a
//! validation read. Transport is up to the implementor; the crate ships a
//! SQLite implementation on [`crate::db::Database`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::timer::SessionRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
}

/// Pause-state update or sync heartbeat.
///
/// `paused_at` travels with `is_paused`: when `is_paused` is present the
/// remote pause boundary is replaced with `paused_at`, including clearing it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
    pub paused_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_paused_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_time: Option<i64>,
}

impl ProgressPatch {
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            is_paused: Some(record.is_paused),
            paused_at: record.paused_at,
            total_paused_time_ms: Some(record.total_paused_time_ms),
            last_synced_time: None,
        }
    }

    pub fn with_last_synced(mut self, synced_at: i64) -> Self {
        self.last_synced_time = Some(synced_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizePatch {
    pub end_time: i64,
    pub total_duration_seconds: u64,
    pub total_paused_time_ms: u64,
    pub is_completed: bool,
}

impl FinalizePatch {
    pub fn new(end_time: i64, total_duration_seconds: u64, total_paused_time_ms: u64) -> Self {
        Self {
            end_time,
            total_duration_seconds,
            total_paused_time_ms,
            is_completed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionPatch {
    Finalize(FinalizePatch),
    Progress(ProgressPatch),
}

impl SessionPatch {
    pub fn is_finalize(&self) -> bool {
        matches!(self, SessionPatch::Finalize(_))
    }
}

/// Server-side view of a session, as returned by the validation read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    pub id: String,
    pub start_time: i64,
    pub is_paused: bool,
    pub paused_at: Option<i64>,
    pub total_paused_time_ms: u64,
    pub last_synced_time: Option<i64>,
    pub end_time: Option<i64>,
    pub total_duration_seconds: Option<u64>,
    pub is_completed: bool,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Starts a remote session; the server picks its own start time.
    async fn create_session(&self) -> Result<CreatedSession>;

    async fn patch_session(&self, session_id: &str, patch: SessionPatch) -> Result<()>;

    /// `Ok(None)` means the backend has no record of the session.
    async fn get_session(&self, session_id: &str) -> Result<Option<RemoteSession>>;
}
