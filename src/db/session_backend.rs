use anyhow::Result;
use async_trait::async_trait;

use crate::{
    backend::{CreatedSession, RemoteSession, SessionBackend, SessionPatch},
    db::Database,
};

#[async_trait]
impl SessionBackend for Database {
    async fn create_session(&self) -> Result<CreatedSession> {
        let session = self.create_study_session().await?;
        Ok(CreatedSession {
            session_id: session.id,
        })
    }

    async fn patch_session(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        match patch {
            SessionPatch::Finalize(finalize) => self.complete_session(session_id, finalize).await,
            SessionPatch::Progress(progress) => self.apply_progress(session_id, progress).await,
        }
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<RemoteSession>> {
        Ok(self
            .get_study_session(session_id)
            .await?
            .as_ref()
            .map(RemoteSession::from))
    }
}
