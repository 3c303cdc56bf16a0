use serde::{Deserialize, Serialize};

use crate::models::{pause::open_pause, Session};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

/// In-memory view of the tracked session. It is a cache over the persisted record and can
/// always be rebuilt from it with `from_session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub status: TimerStatus,
    pub session_id: Option<String>,
    /// Mirrors `Session::running`: true from start until stop, paused or not.
    pub running: bool,
    pub start_ts: Option<i64>,
    /// Start of the open pause, if any.
    pub current_pause_start: Option<i64>,
    /// Closed pause intervals only.
    pub total_paused_ms: u64,
    pub mode: Option<String>,
    /// Derived on every read; never accumulated.
    pub elapsed_ms: u64,
    pub is_backgrounded: bool,
    pub distractions: u32,
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_session(session: &Session) -> Self {
        let current_pause_start = open_pause(&session.pauses).map(|pause| pause.start);
        Self {
            status: if current_pause_start.is_some() {
                TimerStatus::Paused
            } else {
                TimerStatus::Running
            },
            session_id: Some(session.id.clone()),
            running: true,
            start_ts: Some(session.start_ts),
            current_pause_start,
            total_paused_ms: session.paused_ms,
            mode: Some(session.mode.clone()),
            elapsed_ms: 0,
            is_backgrounded: false,
            distractions: session.distractions,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != TimerStatus::Idle
    }

    /// `(now - start) - paused - open pause`, clamped at zero. While paused this is frozen at
    /// the pause start, so repeated reads return the same value.
    pub fn elapsed_at(&self, now_ms: i64) -> u64 {
        let Some(start_ts) = self.start_ts else {
            return 0;
        };
        if !self.is_active() {
            return 0;
        }

        let until = self.current_pause_start.unwrap_or(now_ms);
        let elapsed =
            i128::from(until) - i128::from(start_ts) - i128::from(self.total_paused_ms);
        elapsed.clamp(0, i128::from(u64::MAX)) as u64
    }

    pub fn snapshot(&self, now_ms: i64) -> TimerState {
        let mut snapshot = self.clone();
        snapshot.elapsed_ms = self.elapsed_at(now_ms);
        snapshot
    }
}
