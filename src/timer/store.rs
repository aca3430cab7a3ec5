use std::sync::Arc;

use anyhow::Context;

use crate::storage::KeyValueStore;

use super::SessionRecord;

pub const DEFAULT_STORAGE_KEY: &str = "study_session_data";

#[derive(Debug)]
pub enum LoadError {
    /// The slot holds something that is not a valid [`SessionRecord`].
    Corrupt(String),
    Unavailable(anyhow::Error),
}

/// The single durable slot holding the in-progress [`SessionRecord`].
#[derive(Clone)]
pub struct LocalSessionStore {
    backing: Arc<dyn KeyValueStore>,
    key: String,
}

impl LocalSessionStore {
    pub fn new(backing: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            backing,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Result<Option<SessionRecord>, LoadError> {
        let raw = match self.backing.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => return Err(LoadError::Unavailable(err)),
        };

        let record: SessionRecord = serde_json::from_str(&raw)
            .map_err(|err| LoadError::Corrupt(format!("unparseable session data: {err}")))?;
        record.validate().map_err(LoadError::Corrupt)?;
        Ok(Some(record))
    }

    /// Replaces whatever the slot held before.
    pub fn save(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let serialized =
            serde_json::to_string(record).context("failed to serialize session record")?;
        self.backing
            .set(&self.key, &serialized)
            .with_context(|| format!("failed to persist session record under '{}'", self.key))
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.backing
            .remove(&self.key)
            .with_context(|| format!("failed to clear session record '{}'", self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> (Arc<MemoryStore>, LocalSessionStore) {
        let backing = Arc::new(MemoryStore::new());
        let store = LocalSessionStore::new(backing.clone(), DEFAULT_STORAGE_KEY);
        (backing, store)
    }

    #[test]
    fn save_replaces_leftover_record() {
        let (_, store) = store();
        store.save(&SessionRecord::new("old".into(), 1_000)).unwrap();
        store.save(&SessionRecord::new("new".into(), 2_000)).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.session_id, "new");
        assert_eq!(loaded.start_timestamp, 2_000);
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let (backing, store) = store();
        backing.set(DEFAULT_STORAGE_KEY, "{not json").unwrap();
        assert!(matches!(store.load(), Err(LoadError::Corrupt(_))));

        backing
            .set(DEFAULT_STORAGE_KEY, r#"{"sessionId":"x","isPaused":false}"#)
            .unwrap();
        assert!(matches!(store.load(), Err(LoadError::Corrupt(_))));
    }

    #[test]
    fn structurally_invalid_record_is_corrupt() {
        let (backing, store) = store();
        backing
            .set(
                DEFAULT_STORAGE_KEY,
                r#"{"sessionId":"x","startTimestamp":1000,"isPaused":true,"pausedAt":null,"totalPausedTimeMs":0}"#,
            )
            .unwrap();
        match store.load() {
            Err(LoadError::Corrupt(reason)) => assert!(reason.contains("pausedAt")),
            other => panic!("expected corrupt record, got {other:?}"),
        }
    }

    #[test]
    fn clear_empties_the_slot() {
        let (_, store) = store();
        store.save(&SessionRecord::new("s".into(), 1_000)).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
