pub mod backend;
pub mod clock;
pub mod db;
pub mod settings;
pub mod storage;
pub mod timer;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, Mutex},
};

use clock::SystemClock;
use db::Database;
use settings::SettingsStore;
use storage::FileStore;
use timer::{
    commands::{self, Command},
    LocalSessionStore, NoticeLevel, Recovery, TimerController, TimerEvent, VisibilityReconciler,
};

const DEFAULT_DATA_DIR: &str = ".studytrack";

/// Handles shared by every command.
pub struct AppState {
    pub db: Database,
    pub timer: TimerController,
    pub visibility: Mutex<VisibilityReconciler>,
}

fn data_dir() -> PathBuf {
    std::env::var_os("STUDYTRACK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn build_state() -> anyhow::Result<AppState> {
    let app_data_dir = data_dir();
    std::fs::create_dir_all(&app_data_dir).with_context(|| {
        format!("failed to create data directory {}", app_data_dir.display())
    })?;

    let database = Database::new(app_data_dir.join("studytrack.sqlite3"))?;

    let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;
    let timer_settings = settings_store.timer().with_env_overrides();

    let local = FileStore::new(app_data_dir.join("local"))?;
    let store = LocalSessionStore::new(Arc::new(local), timer_settings.storage_key.clone());

    let timer = TimerController::new(
        store,
        Arc::new(database.clone()),
        Arc::new(SystemClock),
        timer_settings,
    );

    Ok(AppState {
        db: database,
        visibility: Mutex::new(VisibilityReconciler::new(timer.clone())),
        timer,
    })
}

async fn print_notices(mut events: broadcast::Receiver<TimerEvent>) {
    loop {
        match events.recv().await {
            Ok(TimerEvent::Notice(notice)) => {
                let tag = match notice.level {
                    NoticeLevel::Success => "ok",
                    NoticeLevel::Warning => "warning",
                    NoticeLevel::Error => "error",
                };
                println!("[{tag}] {}", notice.message);
            }
            Ok(TimerEvent::SessionEnded(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {skipped} timer notices");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let notices = tokio::spawn(print_notices(state.timer.events()));

    // Pick up a session that was running when the process last exited.
    match state.timer.recover().await {
        Ok(Recovery::NoSession) => {}
        Ok(Recovery::Restored { snapshot, remote }) => info!(
            "Resumed session {} at {} ({remote:?})",
            snapshot.session_id.as_deref().unwrap_or_default(),
            snapshot.display()
        ),
        Ok(Recovery::Expired(summary)) => info!(
            "Session {} exceeded the maximum duration and was ended",
            summary.session_id
        ),
        Err(err) => warn!("Startup recovery failed: {err}"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match commands::dispatch(&state, command).await {
            Ok(output) => println!("{output}"),
            Err(err) => println!("error: {err}"),
        }
    }

    // The local record stays on disk; the next launch recovers it.
    state.timer.shutdown().await;
    notices.abort();
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("studytrack starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(async {
        let state = build_state()?;
        serve(state).await
    });

    if let Err(err) = &result {
        error!("studytrack exited with an error: {err:#}");
    }
    result
}
