//! Shared fixtures for the timer integration tests: a scriptable in-memory
//! backend, a manual clock and a controller harness wired over them.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use studytrack_lib::{
    backend::{CreatedSession, RemoteSession, SessionBackend, SessionPatch},
    clock::{Clock, ManualClock},
    settings::TimerSettings,
    storage::{KeyValueStore, MemoryStore},
    timer::{LocalSessionStore, Notice, SessionRecord, TimerController, TimerEvent},
};

pub const START: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    Patch(String, SessionPatch),
    Get(String),
}

#[derive(Default)]
struct BackendState {
    next_id: u32,
    sessions: HashMap<String, RemoteSession>,
    calls: Vec<Call>,
    fail_create: bool,
    fail_patch: bool,
    fail_get: bool,
    accept_unknown: bool,
}

/// In-memory stand-in for the session server.
///
/// Patches for unknown or completed sessions are rejected unless
/// `accept_unknown_sessions` is on, in which case a progress patch recreates
/// the missing row.
#[derive(Clone)]
pub struct ScriptedBackend {
    state: Arc<Mutex<BackendState>>,
    clock: ManualClock,
    create_gate: Arc<Mutex<Option<Arc<Notify>>>>,
    patch_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl ScriptedBackend {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            clock,
            create_gate: Arc::new(Mutex::new(None)),
            patch_gate: Arc::new(Mutex::new(None)),
        }
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    pub fn fail_patch(&self, fail: bool) {
        self.state().fail_patch = fail;
    }

    pub fn fail_get(&self, fail: bool) {
        self.state().fail_get = fail;
    }

    pub fn accept_unknown_sessions(&self, accept: bool) {
        self.state().accept_unknown = accept;
    }

    /// Makes `create_session` wait until the returned handle is notified.
    pub fn hold_create(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Makes the next `patch_session` wait, after logging the call, until
    /// the returned handle is notified.
    pub fn hold_next_patch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.patch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn forget(&self, session_id: &str) {
        self.state().sessions.remove(session_id);
    }

    pub fn complete_remotely(&self, session_id: &str) {
        if let Some(session) = self.state().sessions.get_mut(session_id) {
            session.is_completed = true;
        }
    }

    pub fn remote(&self, session_id: &str) -> Option<RemoteSession> {
        self.state().sessions.get(session_id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn patches(&self) -> Vec<SessionPatch> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Patch(_, patch) => Some(patch.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.patches()
            .iter()
            .filter(|patch| {
                matches!(patch, SessionPatch::Progress(progress) if progress.last_synced_time.is_some())
            })
            .count()
    }

    pub fn finalize_attempts(&self) -> usize {
        self.patches()
            .iter()
            .filter(|patch| patch.is_finalize())
            .count()
    }
}

#[async_trait]
impl SessionBackend for ScriptedBackend {
    async fn create_session(&self) -> Result<CreatedSession> {
        self.state().calls.push(Call::Create);

        let gate = self.create_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state();
        if state.fail_create {
            return Err(anyhow!("connection refused"));
        }
        state.next_id += 1;
        let id = format!("session-{}", state.next_id);
        state.sessions.insert(
            id.clone(),
            RemoteSession {
                id: id.clone(),
                start_time: self.clock.now_ms(),
                is_paused: false,
                paused_at: None,
                total_paused_time_ms: 0,
                last_synced_time: None,
                end_time: None,
                total_duration_seconds: None,
                is_completed: false,
            },
        );
        Ok(CreatedSession { session_id: id })
    }

    async fn patch_session(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        self.state()
            .calls
            .push(Call::Patch(session_id.to_string(), patch.clone()));

        let gate = self.patch_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state();
        if state.fail_patch {
            return Err(anyhow!("gateway timeout"));
        }

        if !state.sessions.contains_key(session_id) {
            if !state.accept_unknown || patch.is_finalize() {
                return Err(anyhow!("session {session_id} not found"));
            }
            let now = self.clock.now_ms();
            state.sessions.insert(
                session_id.to_string(),
                RemoteSession {
                    id: session_id.to_string(),
                    start_time: now,
                    is_paused: false,
                    paused_at: None,
                    total_paused_time_ms: 0,
                    last_synced_time: None,
                    end_time: None,
                    total_duration_seconds: None,
                    is_completed: false,
                },
            );
        }
        let session = state.sessions.get_mut(session_id).unwrap();

        match patch {
            SessionPatch::Finalize(finalize) => {
                session.end_time = Some(finalize.end_time);
                session.total_duration_seconds = Some(finalize.total_duration_seconds);
                session.total_paused_time_ms = finalize.total_paused_time_ms;
                session.is_paused = false;
                session.paused_at = None;
                session.is_completed = true;
            }
            SessionPatch::Progress(progress) => {
                if session.is_completed {
                    return Err(anyhow!("session {session_id} is already completed"));
                }
                if let Some(is_paused) = progress.is_paused {
                    session.is_paused = is_paused;
                    session.paused_at = progress.paused_at;
                }
                if let Some(total) = progress.total_paused_time_ms {
                    session.total_paused_time_ms = total;
                }
                if let Some(synced) = progress.last_synced_time {
                    session.last_synced_time = Some(synced);
                }
            }
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<RemoteSession>> {
        let mut state = self.state();
        state.calls.push(Call::Get(session_id.to_string()));
        if state.fail_get {
            return Err(anyhow!("network unreachable"));
        }
        Ok(state.sessions.get(session_id).cloned())
    }
}

/// Settings for tests: no waiting between finalize attempts.
pub fn test_settings() -> TimerSettings {
    TimerSettings {
        end_retry_delay_ms: 0,
        ..TimerSettings::default()
    }
}

/// A controller plus handles on everything it talks to.
pub struct Harness {
    pub controller: TimerController,
    pub backend: ScriptedBackend,
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub settings: TimerSettings,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: TimerSettings) -> Self {
        let clock = ManualClock::new(START);
        let backend = ScriptedBackend::new(clock.clone());
        let store = Arc::new(MemoryStore::new());
        let controller = build_controller(&store, &backend, &clock, &settings);
        Self {
            controller,
            backend,
            clock,
            store,
            settings,
        }
    }

    /// A fresh controller over the same store, backend and clock, as after a
    /// page reload or process restart.
    pub fn reopen(&self) -> TimerController {
        build_controller(&self.store, &self.backend, &self.clock, &self.settings)
    }

    pub fn local_store(&self) -> LocalSessionStore {
        LocalSessionStore::new(self.store.clone(), self.settings.storage_key.clone())
    }

    pub fn stored_record(&self) -> Option<SessionRecord> {
        self.local_store().load().unwrap()
    }

    pub fn write_raw(&self, raw: &str) {
        self.store.set(&self.settings.storage_key, raw).unwrap();
    }
}

fn build_controller(
    store: &Arc<MemoryStore>,
    backend: &ScriptedBackend,
    clock: &ManualClock,
    settings: &TimerSettings,
) -> TimerController {
    TimerController::new(
        LocalSessionStore::new(store.clone(), settings.storage_key.clone()),
        Arc::new(backend.clone()),
        Arc::new(clock.clone()),
        settings.clone(),
    )
}

/// Waits (up to a second) for a notice with the given message.
pub async fn wait_for_notice(
    events: &mut broadcast::Receiver<TimerEvent>,
    message: &str,
) -> Option<Notice> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(TimerEvent::Notice(notice)) if notice.message == message => {
                    return Some(notice)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .ok()
        .flatten()
}

/// Notices already delivered, without waiting.
pub fn drain_notices(events: &mut broadcast::Receiver<TimerEvent>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TimerEvent::Notice(notice) = event {
            notices.push(notice);
        }
    }
    notices
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
