use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::{
    backend::{FinalizePatch, ProgressPatch},
    db::{
        helpers::{
            from_millis, parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64,
        },
        models::{SessionStatus, StudySession},
        Database,
    },
};

const SESSION_COLUMNS: &str = "id, started_at, status, is_paused, paused_at, total_paused_ms, \
     last_synced_at, ended_at, total_duration_secs, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<StudySession> {
    let started_at: String = row.get("started_at")?;
    let status: String = row.get("status")?;
    let paused_at: Option<String> = row.get("paused_at")?;
    let total_paused_ms: i64 = row.get("total_paused_ms")?;
    let last_synced_at: Option<String> = row.get("last_synced_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let total_duration_secs: Option<i64> = row.get("total_duration_secs")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(StudySession {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        status: parse_status(&status)?,
        is_paused: row.get("is_paused")?,
        paused_at: parse_optional_datetime(paused_at, "paused_at")?,
        total_paused_ms: to_u64(total_paused_ms, "total_paused_ms")?,
        last_synced_at: parse_optional_datetime(last_synced_at, "last_synced_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        total_duration_secs: total_duration_secs
            .map(|secs| to_u64(secs, "total_duration_secs"))
            .transpose()?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn load_session(conn: &Connection, session_id: &str) -> Result<Option<StudySession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM study_sessions WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt
        .query_row(params![session_id], |row| Ok(row_to_session(row)))
        .optional()?;
    row.transpose()
}

fn write_session(conn: &Connection, session: &StudySession) -> Result<()> {
    conn.execute(
        "UPDATE study_sessions
         SET status = ?1,
             is_paused = ?2,
             paused_at = ?3,
             total_paused_ms = ?4,
             last_synced_at = ?5,
             ended_at = ?6,
             total_duration_secs = ?7,
             updated_at = ?8
         WHERE id = ?9",
        params![
            session.status.as_str(),
            session.is_paused,
            session.paused_at.map(|dt| dt.to_rfc3339()),
            to_i64(session.total_paused_ms)?,
            session.last_synced_at.map(|dt| dt.to_rfc3339()),
            session.ended_at.map(|dt| dt.to_rfc3339()),
            session.total_duration_secs.map(to_i64).transpose()?,
            session.updated_at.to_rfc3339(),
            session.id,
        ],
    )
    .context("failed to update study session")?;
    Ok(())
}

impl Database {
    /// Inserts a running session; the start time is the server's clock.
    pub async fn create_study_session(&self) -> Result<StudySession> {
        self.execute(|conn| {
            let now = Utc::now();
            let session = StudySession {
                id: Uuid::new_v4().to_string(),
                started_at: now,
                status: SessionStatus::Running,
                is_paused: false,
                paused_at: None,
                total_paused_ms: 0,
                last_synced_at: None,
                ended_at: None,
                total_duration_secs: None,
                created_at: now,
                updated_at: now,
            };

            conn.execute(
                "INSERT INTO study_sessions (id, started_at, status, is_paused, total_paused_ms, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session.id,
                    session.started_at.to_rfc3339(),
                    session.status.as_str(),
                    session.is_paused,
                    0i64,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to insert study session")?;

            Ok(session)
        })
        .await
    }

    pub async fn get_study_session(&self, session_id: &str) -> Result<Option<StudySession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| load_session(conn, &session_id)).await
    }

    /// Applies a pause-state update or heartbeat to a session that is still
    /// open. Fields absent from the patch keep their stored values.
    pub async fn apply_progress(&self, session_id: &str, patch: ProgressPatch) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let Some(mut session) = load_session(conn, &session_id)? else {
                bail!("session {session_id} not found");
            };
            if session.status == SessionStatus::Completed {
                bail!("session {session_id} is already completed");
            }

            if let Some(is_paused) = patch.is_paused {
                session.is_paused = is_paused;
                session.paused_at = match (is_paused, patch.paused_at) {
                    (true, Some(ms)) => Some(from_millis(ms, "pausedAt")?),
                    (true, None) => Some(Utc::now()),
                    (false, _) => None,
                };
                session.status = if is_paused {
                    SessionStatus::Paused
                } else {
                    SessionStatus::Running
                };
            }
            if let Some(total) = patch.total_paused_time_ms {
                session.total_paused_ms = total;
            }
            if let Some(ms) = patch.last_synced_time {
                session.last_synced_at = Some(from_millis(ms, "lastSyncedTime")?);
            }
            session.updated_at = Utc::now();

            write_session(conn, &session)
        })
        .await
    }

    /// Finalizes a session. Repeating the call overwrites the earlier result.
    pub async fn complete_session(&self, session_id: &str, patch: FinalizePatch) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let Some(mut session) = load_session(conn, &session_id)? else {
                bail!("session {session_id} not found");
            };

            session.status = SessionStatus::Completed;
            session.is_paused = false;
            session.paused_at = None;
            session.total_paused_ms = patch.total_paused_time_ms;
            session.ended_at = Some(from_millis(patch.end_time, "endTime")?);
            session.total_duration_secs = Some(patch.total_duration_seconds);
            session.updated_at = Utc::now();

            write_session(conn, &session)
        })
        .await
    }

    /// Most recent completed sessions, newest first.
    pub async fn recent_completed_sessions(&self, limit: usize) -> Result<Vec<StudySession>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM study_sessions
                 WHERE status = 'Completed'
                 ORDER BY started_at DESC
                 LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }
}
