use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{EndReason, TimerController};

// Set to true to trace every display refresh
const ENABLE_LOGS: bool = false;

use crate::{log_info, log_warn};

/// Republishes the elapsed time once per `period` while the session runs and
/// enforces the maximum-duration ceiling.
pub(super) async fn display_loop(
    controller: TimerController,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let limit_secs = controller.settings().max_session_secs;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(snapshot) = controller.refresh_display().await else {
                    log_info!("display ticker stopping: timer is no longer running");
                    break;
                };

                log_info!(
                    "tick {} {}",
                    snapshot.session_id.as_deref().unwrap_or_default(),
                    snapshot.display()
                );

                if snapshot.elapsed_secs >= limit_secs {
                    log_warn!(
                        "session {} reached the {}s ceiling; ending it",
                        snapshot.session_id.as_deref().unwrap_or_default(),
                        limit_secs
                    );
                    // Ending cancels this loop, so it runs on its own task.
                    let ender = controller.clone();
                    tokio::spawn(async move {
                        if let Err(err) = ender.end_with_reason(EndReason::MaxDurationExceeded).await {
                            log::error!("automatic end after maximum duration failed: {err}");
                        }
                    });
                    break;
                }
            }
            _ = cancel.cancelled() => {
                log_info!("display ticker cancelled");
                break;
            }
        }
    }
}
