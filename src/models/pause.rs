use serde::{Deserialize, Serialize};

/// One entry of a session's pause ledger. `end` is absent while the pause is open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PauseInterval {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl PauseInterval {
    pub fn open(start: i64) -> Self {
        Self { start, end: None }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Length of a closed interval; an open one counts as zero.
    pub fn duration_ms(&self) -> u64 {
        match self.end {
            Some(end) => end.saturating_sub(self.start).max(0) as u64,
            None => 0,
        }
    }
}

/// Sum of closed intervals. Open entries are not included until they close.
pub fn closed_total_ms(pauses: &[PauseInterval]) -> u64 {
    pauses
        .iter()
        .map(PauseInterval::duration_ms)
        .fold(0u64, u64::saturating_add)
}

pub fn open_pause(pauses: &[PauseInterval]) -> Option<&PauseInterval> {
    pauses.iter().rev().find(|pause| pause.is_open())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_entries_do_not_count_toward_total() {
        let ledger = vec![
            PauseInterval {
                start: 1_000,
                end: Some(1_500),
            },
            PauseInterval {
                start: 2_000,
                end: Some(2_250),
            },
            PauseInterval::open(3_000),
        ];
        assert_eq!(closed_total_ms(&ledger), 750);
        assert_eq!(open_pause(&ledger).map(|p| p.start), Some(3_000));
    }

    #[test]
    fn open_entry_serializes_without_end() {
        let json = serde_json::to_string(&PauseInterval::open(7)).unwrap();
        assert_eq!(json, r#"{"start":7}"#);
    }
}
