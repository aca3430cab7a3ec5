use serde::{Deserialize, Serialize};

/// Durable description of the in-progress session, kept on the client.
///
/// All instants are wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredRecord")]
pub struct SessionRecord {
    pub session_id: String,
    pub start_timestamp: i64,
    pub is_paused: bool,
    pub paused_at: Option<i64>,
    /// Paused time from finished pauses only; an open pause is not folded in
    /// until it ends.
    pub total_paused_time_ms: u64,
    pub last_synced_time: Option<i64>,
}

/// On-disk shape, including the older `totalPausedTime` key. When both keys
/// are present `totalPausedTimeMs` wins.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    session_id: String,
    start_timestamp: i64,
    is_paused: bool,
    #[serde(default)]
    paused_at: Option<i64>,
    #[serde(default)]
    total_paused_time_ms: Option<u64>,
    #[serde(default)]
    total_paused_time: Option<u64>,
    #[serde(default)]
    last_synced_time: Option<i64>,
}

impl From<StoredRecord> for SessionRecord {
    fn from(stored: StoredRecord) -> Self {
        Self {
            session_id: stored.session_id,
            start_timestamp: stored.start_timestamp,
            is_paused: stored.is_paused,
            paused_at: stored.paused_at,
            total_paused_time_ms: stored
                .total_paused_time_ms
                .or(stored.total_paused_time)
                .unwrap_or(0),
            last_synced_time: stored.last_synced_time,
        }
    }
}

impl SessionRecord {
    pub fn new(session_id: String, start_timestamp: i64) -> Self {
        Self {
            session_id,
            start_timestamp,
            is_paused: false,
            paused_at: None,
            total_paused_time_ms: 0,
            last_synced_time: Some(start_timestamp),
        }
    }

    /// Length of the pause in progress at `now`, or zero when running.
    pub fn open_pause_ms(&self, now: i64) -> u64 {
        match (self.is_paused, self.paused_at) {
            (true, Some(paused_at)) => now.saturating_sub(paused_at).max(0) as u64,
            _ => 0,
        }
    }

    /// Paused time including any pause still open at `now`.
    pub fn paused_ms_at(&self, now: i64) -> u64 {
        self.total_paused_time_ms
            .saturating_add(self.open_pause_ms(now))
    }

    pub fn pause(&mut self, now: i64) {
        if self.is_paused {
            return;
        }
        self.is_paused = true;
        self.paused_at = Some(now);
    }

    /// Ends the open pause and folds its length into the running total.
    pub fn resume(&mut self, now: i64) {
        if !self.is_paused {
            return;
        }
        let finished = self.open_pause_ms(now);
        self.total_paused_time_ms = self.total_paused_time_ms.saturating_add(finished);
        self.is_paused = false;
        self.paused_at = None;
    }

    /// Structural checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), String> {
        if self.session_id.trim().is_empty() {
            return Err("sessionId is empty".into());
        }
        if self.start_timestamp <= 0 {
            return Err(format!(
                "startTimestamp {} is not a valid instant",
                self.start_timestamp
            ));
        }
        match (self.is_paused, self.paused_at) {
            (true, None) => return Err("isPaused is set without pausedAt".into()),
            (false, Some(_)) => return Err("pausedAt is set while not paused".into()),
            (true, Some(paused_at)) if paused_at < self.start_timestamp => {
                return Err(format!(
                    "pausedAt {paused_at} precedes startTimestamp {}",
                    self.start_timestamp
                ));
            }
            _ => {}
        }
        Ok(())
    }
}
