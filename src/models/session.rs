//! Persisted focus-session record.
//!
//! The serialized shape is shared with the sync and analytics collaborators, so changes
//! here are additive only: new fields carry `#[serde(default)]` so records written by
//! older builds still deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pause::PauseInterval;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub device_id: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub running: bool,
    pub mode: String,
    pub paused_ms: u64,
    #[serde(default)]
    pub pauses: Vec<PauseInterval>,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub distractions: u32,
}

impl Session {
    pub fn begin(id: String, device_id: String, mode: String, now_ms: i64) -> Self {
        Self {
            id,
            device_id,
            start_ts: now_ms,
            end_ts: None,
            running: true,
            mode,
            paused_ms: 0,
            pauses: Vec::new(),
            created_at: now_ms,
            updated_at: now_ms,
            sync_status: SyncStatus::Pending,
            distractions: 0,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_ts)
    }

    /// Last time the record was touched, falling back to creation for records that predate
    /// `updatedAt`.
    pub fn last_touched_ms(&self) -> i64 {
        self.updated_at.max(self.created_at)
    }

    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(end_ts) = patch.end_ts {
            self.end_ts = Some(end_ts);
        }
        if let Some(running) = patch.running {
            self.running = running;
        }
        if let Some(paused_ms) = patch.paused_ms {
            self.paused_ms = paused_ms;
        }
        if let Some(pauses) = &patch.pauses {
            self.pauses = pauses.clone();
        }
        if let Some(distractions) = patch.distractions {
            self.distractions = distractions;
        }
        if let Some(sync_status) = patch.sync_status {
            self.sync_status = sync_status;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }
}

/// Partial update of a session. Absent fields are left untouched; identity fields
/// (`id`, `deviceId`, `startTs`, `mode`, `createdAt`) have no counterpart here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub end_ts: Option<i64>,
    pub running: Option<bool>,
    pub paused_ms: Option<u64>,
    pub pauses: Option<Vec<PauseInterval>>,
    pub distractions: Option<u32>,
    pub sync_status: Option<SyncStatus>,
    pub updated_at: Option<i64>,
}

impl SessionPatch {
    /// Base for every local mutation: marks the record for sync and stamps it.
    pub fn touched(now_ms: i64) -> Self {
        Self {
            sync_status: Some(SyncStatus::Pending),
            updated_at: Some(now_ms),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_record_without_additive_fields_still_reads() {
        let raw = r#"{
            "id": "s-1",
            "deviceId": "device-a",
            "startTs": 1000000,
            "endTs": 1010000,
            "running": false,
            "mode": "flow",
            "pausedMs": 2000,
            "pauses": [{"start": 1002000, "end": 1004000}],
            "createdAt": 1000000,
            "syncStatus": "synced"
        }"#;

        let session: Session = serde_json::from_str(raw).unwrap();
        assert_eq!(session.distractions, 0);
        assert_eq!(session.updated_at, 0);
        assert_eq!(session.last_touched_ms(), 1_000_000);
        assert_eq!(session.sync_status, SyncStatus::Synced);
        assert_eq!(session.pauses[0].end, Some(1_004_000));
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut session = Session::begin("s".into(), "d".into(), "flow".into(), 100);
        session.sync_status = SyncStatus::Synced;

        let patch = SessionPatch {
            paused_ms: Some(40),
            ..SessionPatch::touched(500)
        };
        session.apply(&patch);

        assert_eq!(session.paused_ms, 40);
        assert_eq!(session.updated_at, 500);
        assert_eq!(session.sync_status, SyncStatus::Pending);
        assert!(session.running);
        assert_eq!(session.end_ts, None);
        assert_eq!(session.start_ts, 100);
    }
}
