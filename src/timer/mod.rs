pub mod commands;
pub mod controller;
pub mod elapsed;
pub mod error;
pub mod record;
pub mod state;
pub mod store;
mod sync;
mod ticker;
pub mod visibility;

pub use controller::{Recovery, RemoteCheck, TimerController};
pub use elapsed::{elapsed_ms, elapsed_seconds, format_hms};
pub use error::TimerError;
pub use record::SessionRecord;
pub use state::{
    EndReason, Notice, NoticeLevel, SessionSummary, TimerEvent, TimerSnapshot, TimerState,
    TimerStatus,
};
pub use store::{LoadError, LocalSessionStore, DEFAULT_STORAGE_KEY};
pub use visibility::{Visibility, VisibilityReconciler};
