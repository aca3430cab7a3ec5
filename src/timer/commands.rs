use std::str::FromStr;

use crate::{
    db::StudySession,
    timer::{format_hms, Recovery, SessionSummary, TimerSnapshot, Visibility},
    AppState,
};

const HISTORY_LIMIT: usize = 10;

/// One line of driver input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    TogglePause,
    End,
    Status,
    Sync,
    Hide,
    Show,
    History,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "pause" | "resume" => Ok(Command::TogglePause),
            "end" | "stop" => Ok(Command::End),
            "status" => Ok(Command::Status),
            "sync" => Ok(Command::Sync),
            "hide" => Ok(Command::Hide),
            "show" => Ok(Command::Show),
            "history" => Ok(Command::History),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

pub async fn get_timer_state(state: &AppState) -> Result<TimerSnapshot, String> {
    Ok(state.timer.snapshot().await)
}

pub async fn start_timer(state: &AppState) -> Result<TimerSnapshot, String> {
    state.timer.start().await.map_err(|e| e.to_string())
}

pub async fn toggle_pause(state: &AppState) -> Result<TimerSnapshot, String> {
    state.timer.toggle_pause().await.map_err(|e| e.to_string())
}

pub async fn end_timer(state: &AppState) -> Result<Option<SessionSummary>, String> {
    state.timer.end().await.map_err(|e| e.to_string())
}

/// Forces a heartbeat and waits for it. `false` when nothing was synced.
pub async fn sync_timer(state: &AppState) -> Result<bool, String> {
    match state.timer.sync_now().await {
        Some(handle) => handle.await.map_err(|e| e.to_string()),
        None => Ok(false),
    }
}

pub async fn set_visibility(
    state: &AppState,
    visibility: Visibility,
) -> Result<Option<Recovery>, String> {
    let mut reconciler = state.visibility.lock().await;
    reconciler
        .on_visibility_change(visibility)
        .await
        .map_err(|e| e.to_string())
}

pub async fn list_recent_sessions(state: &AppState) -> Result<Vec<StudySession>, String> {
    state
        .db
        .recent_completed_sessions(HISTORY_LIMIT)
        .await
        .map_err(|e| e.to_string())
}

/// Runs one command and renders its outcome as a line of output.
pub async fn dispatch(state: &AppState, command: Command) -> Result<String, String> {
    match command {
        Command::Start => start_timer(state).await.map(|snapshot| render_snapshot(&snapshot)),
        Command::TogglePause => toggle_pause(state)
            .await
            .map(|snapshot| render_snapshot(&snapshot)),
        Command::End => end_timer(state).await.map(|summary| match summary {
            Some(summary) => format!(
                "ended {} after {}",
                summary.session_id,
                format_hms(summary.duration_secs)
            ),
            None => "no active session".to_string(),
        }),
        Command::Status => get_timer_state(state)
            .await
            .map(|snapshot| render_snapshot(&snapshot)),
        Command::Sync => sync_timer(state).await.map(|synced| {
            if synced {
                "synced".to_string()
            } else {
                "nothing to sync".to_string()
            }
        }),
        Command::Hide => set_visibility(state, Visibility::Hidden)
            .await
            .map(|_| "hidden".to_string()),
        Command::Show => set_visibility(state, Visibility::Visible)
            .await
            .map(|recovery| match recovery {
                Some(Recovery::Restored { snapshot, .. }) => render_snapshot(&snapshot),
                Some(Recovery::Expired(summary)) => format!(
                    "session {} expired after {}",
                    summary.session_id,
                    format_hms(summary.duration_secs)
                ),
                Some(Recovery::NoSession) | None => "visible".to_string(),
            }),
        Command::History => list_recent_sessions(state).await.map(|sessions| {
            if sessions.is_empty() {
                return "no completed sessions".to_string();
            }
            sessions
                .iter()
                .map(|session| {
                    format!(
                        "{}  {}  {}",
                        session.started_at.format("%Y-%m-%d %H:%M"),
                        format_hms(session.total_duration_secs.unwrap_or(0)),
                        session.id
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }),
        Command::Quit => Ok(String::new()),
    }
}

fn render_snapshot(snapshot: &TimerSnapshot) -> String {
    match &snapshot.session_id {
        Some(id) => format!("{} {} ({id})", snapshot.status, snapshot.display()),
        None => format!("{} {}", snapshot.status, snapshot.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerStatus;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!("START".parse::<Command>(), Ok(Command::Start));
        assert_eq!(" resume ".parse::<Command>(), Ok(Command::TogglePause));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
        assert!("launch".parse::<Command>().is_err());
    }

    #[test]
    fn renders_idle_and_running_snapshots() {
        assert_eq!(render_snapshot(&TimerSnapshot::default()), "idle 00:00:00");

        let running = TimerSnapshot {
            status: TimerStatus::Running,
            session_id: Some("abc".into()),
            elapsed_secs: 3_725,
            ..TimerSnapshot::default()
        };
        assert_eq!(render_snapshot(&running), "running 01:02:05 (abc)");
    }
}
