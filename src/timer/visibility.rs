use log::{debug, error};
use serde::{Deserialize, Serialize};

use super::{Recovery, TimerController, TimerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Re-derives timer state when the page comes back to the foreground, where
/// throttled timers or device sleep may have left the display stale.
pub struct VisibilityReconciler {
    controller: TimerController,
    current: Visibility,
}

impl VisibilityReconciler {
    pub fn new(controller: TimerController) -> Self {
        Self {
            controller,
            current: Visibility::Visible,
        }
    }

    pub fn current(&self) -> Visibility {
        self.current
    }

    /// Returns the recovery outcome when a reconcile ran.
    pub async fn on_visibility_change(
        &mut self,
        next: Visibility,
    ) -> Result<Option<Recovery>, TimerError> {
        let previous = std::mem::replace(&mut self.current, next);
        if previous != Visibility::Hidden || next != Visibility::Visible {
            return Ok(None);
        }

        let Some(tracked) = self.controller.tracked_session_id().await else {
            debug!("Foregrounded with no tracked session");
            return Ok(None);
        };

        let stored = match self.controller.stored_session_id() {
            Ok(stored) => stored,
            Err(err) => {
                error!("Error checking session data on foreground: {err}");
                return Ok(None);
            }
        };

        if stored.as_deref() != Some(tracked.as_str()) {
            debug!("Stored session {stored:?} differs from tracked {tracked}; not reconciling");
            return Ok(None);
        }

        self.controller.recover().await.map(Some)
    }
}
