use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::backend::{ProgressPatch, SessionPatch};

use super::{Notice, TimerController};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Pushes a heartbeat every `period` while the session runs. The first push
/// happens one full period after (re)entering the running state.
pub(super) async fn sync_loop(
    controller: TimerController,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if controller.sync_now().await.is_none() {
                    log_info!("sync scheduler stopping: timer is no longer running");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

impl TimerController {
    /// Replicates the current pause state to the backend on a detached task.
    ///
    /// Returns `None` when there is nothing to sync (idle or paused). The
    /// task resolves to whether the result was applied locally. A heartbeat
    /// overtaken by a pause change is not sent, and a response for a session
    /// that has since ended is discarded.
    pub async fn sync_now(&self) -> Option<JoinHandle<bool>> {
        let (record, revision) = self.running_record().await?;
        let controller = self.clone();

        Some(tokio::spawn(async move {
            let _push = controller.lock_pushes().await;
            if !controller.is_current(&record.session_id, revision).await {
                log_info!(
                    "heartbeat for session {} superseded by a pause change",
                    record.session_id
                );
                return false;
            }

            let synced_at = controller.now_ms();
            let patch = SessionPatch::Progress(
                ProgressPatch::from_record(&record).with_last_synced(synced_at),
            );

            match controller
                .backend()
                .patch_session(&record.session_id, patch)
                .await
            {
                Ok(()) => {
                    controller
                        .apply_sync_result(&record.session_id, synced_at)
                        .await
                }
                Err(err) => {
                    log_warn!("sync for session {} failed: {err:#}", record.session_id);
                    controller.notify(Notice::warning(
                        "Session sync failed, but timer will continue",
                    ));
                    false
                }
            }
        }))
    }
}
