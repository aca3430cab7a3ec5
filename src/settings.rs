use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::timer::DEFAULT_STORAGE_KEY;

const DEBUG_SYNC_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSettings {
    pub tick_interval_ms: u64,
    pub sync_interval_secs: u64,
    /// Active time after which a session is ended automatically.
    pub max_session_secs: u64,
    pub end_retry_attempts: u32,
    pub end_retry_delay_ms: u64,
    pub storage_key: String,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            sync_interval_secs: 60,
            max_session_secs: 24 * 60 * 60,
            end_retry_attempts: 1,
            end_retry_delay_ms: 1_000,
            storage_key: DEFAULT_STORAGE_KEY.into(),
        }
    }
}

impl TimerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn end_retry_delay(&self) -> Duration {
        Duration::from_millis(self.end_retry_delay_ms)
    }

    /// `STUDYTRACK_DEBUG=1|true` syncs every few seconds instead of every minute.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("STUDYTRACK_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.sync_interval_secs = DEBUG_SYNC_INTERVAL_SECS;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    timer: TimerSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn timer(&self) -> TimerSettings {
        self.read().timer.clone()
    }

    pub fn update_timer(&self, settings: TimerSettings) -> Result<()> {
        let mut guard = self.write();
        guard.timer = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
