//! Pause-aware elapsed time, derived purely from a [`SessionRecord`] and `now`.

use super::SessionRecord;

/// Active (unpaused) milliseconds at `now`, clamped at zero.
pub fn elapsed_ms(record: &SessionRecord, now: i64) -> u64 {
    let raw = now.saturating_sub(record.start_timestamp);
    let paused = i64::try_from(record.paused_ms_at(now)).unwrap_or(i64::MAX);
    raw.saturating_sub(paused).max(0) as u64
}

/// Whole active seconds at `now`; floor of [`elapsed_ms`].
pub fn elapsed_seconds(record: &SessionRecord, now: i64) -> u64 {
    elapsed_ms(record, now) / 1000
}

pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
