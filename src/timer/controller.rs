use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::{
    sync::{broadcast, watch, Mutex, OwnedMutexGuard},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{FinalizePatch, ProgressPatch, SessionBackend, SessionPatch},
    clock::Clock,
    settings::TimerSettings,
};

use super::{
    elapsed_seconds, format_hms,
    store::{LoadError, LocalSessionStore},
    sync, ticker, EndReason, Notice, SessionRecord, SessionSummary, TimerError, TimerEvent,
    TimerSnapshot, TimerState, TimerStatus,
};

const EVENT_CAPACITY: usize = 64;

/// Outcome of [`TimerController::recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    NoSession,
    Restored {
        snapshot: TimerSnapshot,
        remote: RemoteCheck,
    },
    /// The restored session was already past the duration ceiling and has
    /// been ended.
    Expired(SessionSummary),
}

/// Result of the best-effort backend validation done during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCheck {
    Confirmed,
    RemoteCompleted,
    Corrected,
    CorrectionFailed,
    Unreachable,
}

struct LoopHandles {
    cancel: CancellationToken,
    ticker: JoinHandle<()>,
    sync: JoinHandle<()>,
}

/// Drives the study-session lifecycle and is the only writer of the
/// [`LocalSessionStore`].
///
/// Every store write happens while `state` is locked, so background sync
/// results can never resurrect a record that `end` or `recover` removed.
#[derive(Clone)]
pub struct TimerController {
    state: Arc<Mutex<TimerState>>,
    lifecycle: Arc<Mutex<()>>,
    /// Serializes progress pushes so they reach the backend in order.
    pushes: Arc<Mutex<()>>,
    store: LocalSessionStore,
    backend: Arc<dyn SessionBackend>,
    clock: Arc<dyn Clock>,
    settings: TimerSettings,
    snapshot_tx: Arc<watch::Sender<TimerSnapshot>>,
    events_tx: broadcast::Sender<TimerEvent>,
    loops: Arc<Mutex<Option<LoopHandles>>>,
}

impl TimerController {
    pub fn new(
        store: LocalSessionStore,
        backend: Arc<dyn SessionBackend>,
        clock: Arc<dyn Clock>,
        settings: TimerSettings,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(TimerSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(TimerState::new())),
            lifecycle: Arc::new(Mutex::new(())),
            pushes: Arc::new(Mutex::new(())),
            store,
            backend,
            clock,
            settings,
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
            loops: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<TimerEvent> {
        self.events_tx.subscribe()
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub async fn status(&self) -> TimerStatus {
        self.state.lock().await.status
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let state = self.state.lock().await;
        state.snapshot(self.clock.now_ms())
    }

    pub async fn tracked_session_id(&self) -> Option<String> {
        self.state.lock().await.session_id().map(str::to_string)
    }

    /// Session id currently held by the durable store, independent of what
    /// the controller is tracking in memory.
    pub fn stored_session_id(&self) -> Result<Option<String>, TimerError> {
        match self.store.load() {
            Ok(record) => Ok(record.map(|record| record.session_id)),
            Err(LoadError::Corrupt(reason)) => Err(TimerError::CorruptRecord(reason)),
            Err(LoadError::Unavailable(err)) => Err(TimerError::Storage(err)),
        }
    }

    pub async fn start(&self) -> Result<TimerSnapshot, TimerError> {
        let _op = self.begin_operation()?;

        {
            let state = self.state.lock().await;
            if state.status != TimerStatus::Idle {
                return Err(TimerError::InvalidTransition {
                    operation: "start",
                    status: state.status,
                });
            }
        }

        let created = match self.backend.create_session().await {
            Ok(created) => created,
            Err(err) => {
                warn!("Failed to create remote session: {err:#}");
                self.notify(Notice::error("Failed to start session"));
                return Err(TimerError::Backend(err));
            }
        };

        let now = self.clock.now_ms();
        let record = SessionRecord::new(created.session_id, now);

        let snapshot = {
            let mut state = self.state.lock().await;
            if let Err(err) = self.store.save(&record) {
                error!("Failed to persist new session {}: {err:#}", record.session_id);
                self.notify(Notice::error("Failed to start session"));
                return Err(TimerError::Storage(err));
            }
            state.adopt(record);
            self.publish_locked(&state, now)
        };

        self.start_loops().await;

        info!(
            "Study session {} started",
            snapshot.session_id.as_deref().unwrap_or_default()
        );
        self.notify(Notice::success("Study session started!"));
        Ok(snapshot)
    }

    /// Pauses a running session or resumes a paused one.
    ///
    /// The local record is persisted before the backend hears about it; a
    /// failed push is reported but never rolls the local change back.
    pub async fn toggle_pause(&self) -> Result<TimerSnapshot, TimerError> {
        let _op = self.begin_operation()?;
        let now = self.clock.now_ms();

        let (snapshot, record, revision) = {
            let mut state = self.state.lock().await;
            let mut record = match (state.status, state.record.clone()) {
                (TimerStatus::Running | TimerStatus::Paused, Some(record)) => record,
                (status, _) => {
                    return Err(TimerError::InvalidTransition {
                        operation: "toggle pause",
                        status,
                    })
                }
            };

            if record.is_paused {
                record.resume(now);
            } else {
                record.pause(now);
            }

            self.store.save(&record).map_err(TimerError::Storage)?;
            state.adopt(record.clone());
            state.revision += 1;
            (self.publish_locked(&state, now), record, state.revision)
        };

        if record.is_paused {
            self.stop_loops().await;
            info!("Session {} paused", record.session_id);
            self.notify(Notice::success("Session paused"));
        } else {
            self.start_loops().await;
            info!(
                "Session {} resumed ({}ms paused so far)",
                record.session_id, record.total_paused_time_ms
            );
            self.notify(Notice::success("Session resumed"));
        }

        self.spawn_pause_push(record, revision);
        Ok(snapshot)
    }

    /// Ends the active session. Ending an idle timer is a no-op.
    pub async fn end(&self) -> Result<Option<SessionSummary>, TimerError> {
        self.end_with_reason(EndReason::UserRequested).await
    }

    pub async fn end_with_reason(
        &self,
        reason: EndReason,
    ) -> Result<Option<SessionSummary>, TimerError> {
        let _op = self.begin_operation()?;
        self.finish(reason).await
    }

    /// Restores the timer from the durable store, then validates the session
    /// against the backend on a best-effort basis.
    pub async fn recover(&self) -> Result<Recovery, TimerError> {
        let _op = self.begin_operation()?;
        let now = self.clock.now_ms();

        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.reset_untracked(now).await;
                return Ok(Recovery::NoSession);
            }
            Err(LoadError::Corrupt(reason)) => return Err(self.discard_corrupt(reason, now).await),
            Err(LoadError::Unavailable(err)) => {
                warn!("Local session store unavailable during recovery: {err:#}");
                self.notify(Notice::error("Failed to restore session data"));
                return Err(TimerError::Storage(err));
            }
        };

        let (snapshot, unchanged) = {
            let mut state = self.state.lock().await;
            let previous_status = state.status;
            let same_session = state.session_id() == Some(record.session_id.as_str());
            state.adopt(record.clone());
            let unchanged = same_session && previous_status == state.status;
            if !unchanged {
                state.revision += 1;
            }
            (self.publish_locked(&state, now), unchanged)
        };

        if record.is_paused {
            self.stop_loops().await;
        } else if !unchanged || !self.loops_live().await {
            // A running session that is only being re-derived keeps its sync
            // schedule.
            self.start_loops().await;
        }

        info!(
            "Recovered session {} as {} at {}",
            record.session_id,
            snapshot.status,
            snapshot.display()
        );

        if snapshot.elapsed_secs >= self.settings.max_session_secs {
            return match self.finish(EndReason::MaxDurationExceeded).await? {
                Some(summary) => Ok(Recovery::Expired(summary)),
                None => Ok(Recovery::NoSession),
            };
        }

        let remote = self.validate_remote(&record).await;
        Ok(Recovery::Restored { snapshot, remote })
    }

    /// Applies a successful backend sync to the local record. Results for a
    /// session that is no longer current are dropped.
    pub async fn apply_sync_result(&self, session_id: &str, synced_at: i64) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = state
            .record
            .as_mut()
            .filter(|record| record.session_id == session_id)
        else {
            debug!("Dropping sync result for stale session {session_id}");
            return false;
        };

        record.last_synced_time = Some(record.last_synced_time.unwrap_or(0).max(synced_at));
        if let Err(err) = self.store.save(record) {
            warn!("Failed to record sync time for session {session_id}: {err:#}");
        }

        self.publish_locked(&state, self.clock.now_ms());
        true
    }

    /// Stops the background loops and waits for them to exit.
    pub async fn shutdown(&self) {
        let handles = self.loops.lock().await.take();
        if let Some(handles) = handles {
            handles.cancel.cancel();
            if let Err(err) = handles.ticker.await {
                warn!("Display ticker did not shut down cleanly: {err}");
            }
            if let Err(err) = handles.sync.await {
                warn!("Sync scheduler did not shut down cleanly: {err}");
            }
        }
    }

    pub(super) fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    pub(super) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(super) fn notify(&self, notice: Notice) {
        // No subscribers is fine; notices are advisory.
        let _ = self.events_tx.send(TimerEvent::Notice(notice));
    }

    /// Record to replicate, with its revision, if the timer is running.
    pub(super) async fn running_record(&self) -> Option<(SessionRecord, u64)> {
        let state = self.state.lock().await;
        match (state.status, &state.record) {
            (TimerStatus::Running, Some(record)) => Some((record.clone(), state.revision)),
            _ => None,
        }
    }

    /// Held for the duration of a progress push.
    pub(super) async fn lock_pushes(&self) -> OwnedMutexGuard<()> {
        self.pushes.clone().lock_owned().await
    }

    pub(super) async fn is_current(&self, session_id: &str, revision: u64) -> bool {
        self.state.lock().await.is_current(session_id, revision)
    }

    /// Republishes the elapsed time. `None` once the timer is not running.
    pub(super) async fn refresh_display(&self) -> Option<TimerSnapshot> {
        let state = self.state.lock().await;
        if state.status != TimerStatus::Running {
            return None;
        }
        Some(self.publish_locked(&state, self.clock.now_ms()))
    }

    fn begin_operation(&self) -> Result<OwnedMutexGuard<()>, TimerError> {
        self.lifecycle
            .clone()
            .try_lock_owned()
            .map_err(|_| TimerError::Busy)
    }

    fn publish_locked(&self, state: &TimerState, now: i64) -> TimerSnapshot {
        let snapshot = state.snapshot(now);
        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    async fn finish(&self, reason: EndReason) -> Result<Option<SessionSummary>, TimerError> {
        let now = self.clock.now_ms();
        let record = {
            let state = self.state.lock().await;
            match (&state.record, state.status.has_session()) {
                (Some(record), true) => record.clone(),
                _ => return Ok(None),
            }
        };

        self.stop_loops().await;

        if reason == EndReason::MaxDurationExceeded {
            let exceeded = TimerError::DurationExceeded {
                limit_secs: self.settings.max_session_secs,
            };
            warn!("Session {}: {exceeded}", record.session_id);
            self.notify(Notice::error(exceeded.notice_message()));
        }

        let duration_secs = elapsed_seconds(&record, now);
        let total_paused_ms = record.paused_ms_at(now);
        let patch =
            SessionPatch::Finalize(FinalizePatch::new(now, duration_secs, total_paused_ms));
        let outcome = self.finalize_with_retry(&record.session_id, patch).await;

        {
            let mut state = self.state.lock().await;
            if let Err(err) = self.store.clear() {
                error!(
                    "Failed to clear local record for ended session {}: {err:#}",
                    record.session_id
                );
            }
            state.reset();
            self.publish_locked(&state, now);
        }

        let summary = SessionSummary {
            session_id: record.session_id.clone(),
            started_at: record.start_timestamp,
            ended_at: now,
            duration_secs,
            total_paused_ms,
            reason,
            synced: outcome.is_ok(),
        };
        let _ = self.events_tx.send(TimerEvent::SessionEnded(summary.clone()));

        match outcome {
            Ok(()) => {
                info!(
                    "Study session {} ended after {}",
                    summary.session_id,
                    format_hms(duration_secs)
                );
                self.notify(Notice::success(format!(
                    "Study session ended! You studied for {}",
                    format_hms(duration_secs)
                )));
                Ok(Some(summary))
            }
            Err(source) => {
                let err = TimerError::UnsyncedEnd {
                    session_id: summary.session_id,
                    duration_secs,
                    source,
                };
                error!("{err:#}");
                self.notify(Notice::error(err.notice_message()));
                Err(err)
            }
        }
    }

    async fn finalize_with_retry(&self, session_id: &str, patch: SessionPatch) -> anyhow::Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.backend.patch_session(session_id, patch.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.settings.end_retry_attempts => {
                    attempt += 1;
                    let delay = retry_delay(self.settings.end_retry_delay(), attempt);
                    warn!(
                        "Finalizing session {session_id} failed (attempt {attempt}): {err:#}; retrying in {delay:?}"
                    );
                    time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn validate_remote(&self, record: &SessionRecord) -> RemoteCheck {
        let session_id = record.session_id.as_str();
        match self.backend.get_session(session_id).await {
            Ok(Some(remote)) if remote.is_completed => {
                warn!("Session {session_id} is already completed on the server");
                self.notify(Notice::warning(
                    "This session was already ended on another device",
                ));
                RemoteCheck::RemoteCompleted
            }
            Ok(Some(_)) => RemoteCheck::Confirmed,
            Ok(None) => {
                let conflict = TimerError::Conflict {
                    session_id: session_id.to_string(),
                };
                warn!("{conflict}; pushing local state instead of discarding it");
                self.notify(Notice::warning(conflict.notice_message()));

                let synced_at = self.clock.now_ms();
                let patch = SessionPatch::Progress(
                    ProgressPatch::from_record(record).with_last_synced(synced_at),
                );
                let pushed = {
                    let _push = self.lock_pushes().await;
                    self.backend.patch_session(session_id, patch).await
                };
                match pushed {
                    Ok(()) => {
                        self.apply_sync_result(session_id, synced_at).await;
                        RemoteCheck::Corrected
                    }
                    Err(err) => {
                        warn!("Corrective push for session {session_id} failed: {err:#}");
                        self.notify(Notice::warning(
                            "Session sync failed, but timer will continue",
                        ));
                        RemoteCheck::CorrectionFailed
                    }
                }
            }
            Err(err) => {
                warn!("Validating session {session_id} failed: {err:#}");
                self.notify(Notice::warning("Session sync failed, but timer will continue"));
                RemoteCheck::Unreachable
            }
        }
    }

    async fn discard_corrupt(&self, reason: String, now: i64) -> TimerError {
        error!("Discarding corrupt local session data: {reason}");
        {
            let mut state = self.state.lock().await;
            if let Err(err) = self.store.clear() {
                error!("Failed to clear corrupt session data: {err:#}");
            }
            state.reset();
            self.publish_locked(&state, now);
        }
        self.stop_loops().await;

        let err = TimerError::CorruptRecord(reason);
        self.notify(Notice::error(err.notice_message()));
        err
    }

    async fn reset_untracked(&self, now: i64) {
        let was_tracking = {
            let mut state = self.state.lock().await;
            let was_tracking = state.status.has_session();
            if was_tracking {
                warn!(
                    "Local record for session {} disappeared; resetting timer",
                    state.session_id().unwrap_or_default()
                );
                state.reset();
                self.publish_locked(&state, now);
            }
            was_tracking
        };
        if was_tracking {
            self.stop_loops().await;
        }
    }

    fn spawn_pause_push(&self, record: SessionRecord, revision: u64) {
        let controller = self.clone();
        tokio::spawn(async move {
            let _push = controller.lock_pushes().await;
            if !controller.is_current(&record.session_id, revision).await {
                debug!(
                    "Skipping superseded pause push for session {}",
                    record.session_id
                );
                return;
            }

            let patch = SessionPatch::Progress(ProgressPatch::from_record(&record));
            if let Err(err) = controller
                .backend
                .patch_session(&record.session_id, patch)
                .await
            {
                let tracked = controller.tracked_session_id().await;
                if tracked.as_deref() != Some(record.session_id.as_str()) {
                    debug!(
                        "Ignoring failed pause push for ended session {}: {err:#}",
                        record.session_id
                    );
                    return;
                }
                warn!(
                    "Pushing pause state for session {} failed: {err:#}",
                    record.session_id
                );
                controller.notify(Notice::error("Failed to update session state"));
            }
        });
    }

    async fn start_loops(&self) {
        let mut guard = self.loops.lock().await;
        if let Some(previous) = guard.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let ticker = tokio::spawn(ticker::display_loop(
            self.clone(),
            self.settings.tick_interval(),
            cancel.clone(),
        ));
        let sync = tokio::spawn(sync::sync_loop(
            self.clone(),
            self.settings.sync_interval(),
            cancel.clone(),
        ));

        *guard = Some(LoopHandles {
            cancel,
            ticker,
            sync,
        });
    }

    async fn loops_live(&self) -> bool {
        self.loops.lock().await.as_ref().is_some_and(|handles| {
            !handles.cancel.is_cancelled()
                && !handles.ticker.is_finished()
                && !handles.sync.is_finished()
        })
    }

    async fn stop_loops(&self) {
        if let Some(handles) = self.loops.lock().await.take() {
            handles.cancel.cancel();
        }
    }
}

fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let scaled = base.saturating_mul(attempt.max(1));
    let jitter_cap = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_cap)
    };
    scaled.saturating_add(Duration::from_millis(jitter))
}
