use crate::clock::Millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutable state of one start/stop cycle. Active time lives in the
/// [`ActiveClock`](crate::clock::ActiveClock) next to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementRun {
    pub active: bool,
    pub first_keystroke_at: Option<Millis>,
    pub stopped_at: Option<Millis>,
    pub counted_chars: u64,
    pub backspace_count: u64,
    pub pasted_char_count: u64,
    pub peak_wpm: u32,
}

impl MeasurementRun {
    pub fn started() -> Self {
        Self {
            active: true,
            ..Default::default()
        }
    }

    pub fn has_data(&self) -> bool {
        self.first_keystroke_at.is_some()
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub active: bool,
    pub wpm: u32,
    pub cpm: u32,
    pub counted_chars: u64,
    pub backspace_count: u64,
    pub pasted_char_count: u64,
    pub elapsed_secs: u64,
    pub active_secs: u64,
    pub peak_wpm: u32,
    pub has_data: bool,
}

/// A finished run as kept in history. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub domain: String,
    pub active_secs: u64,
    pub wpm: u32,
    pub cpm: u32,
    pub total_chars: u64,
    pub backspaces: u64,
    pub pasted_chars: u64,
    pub peak_wpm: u32,
}

impl Session {
    pub fn from_snapshot(snapshot: &Snapshot, created_ms: Millis, domain: &str) -> Self {
        let id = created_ms as i64;
        Self {
            id,
            created_at: DateTime::from_timestamp_millis(id).unwrap_or_default(),
            domain: domain.to_string(),
            active_secs: snapshot.active_secs,
            wpm: snapshot.wpm,
            cpm: snapshot.cpm,
            total_chars: snapshot.counted_chars,
            backspaces: snapshot.backspace_count,
            pasted_chars: snapshot.pasted_char_count,
            peak_wpm: snapshot.peak_wpm,
        }
    }
}
