//! Ledger arithmetic and repair used by transitions and by restore.
//!
//! Elapsed time is always recomputed from timestamps, so reconciliation never has to
//! "catch up" on missed ticks; it only has to make sure the ledger it computes from is sound.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::{pause::closed_total_ms, PauseInterval, Session};

/// What a restore or a return to the foreground found.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    /// Wall time that passed without the timer observing it.
    pub gap_ms: u64,
    pub elapsed_before_ms: u64,
    pub elapsed_after_ms: u64,
    /// Gap is large enough that the UI should tell the user time was reconciled.
    pub notable: bool,
    /// Background checkpoint did not reach the store. In-memory state is still intact.
    pub checkpoint_failed: bool,
}

/// Earliest timestamp a new pause may start at: never before the session start or the
/// end of the previous pause.
pub(crate) fn pause_floor(session: &Session) -> i64 {
    session
        .pauses
        .iter()
        .map(|pause| pause.end.unwrap_or(pause.start))
        .fold(session.start_ts, i64::max)
}

/// Clamp a clock reading into `[floor, ..)`, logging when the clock ran backwards.
pub(crate) fn clamp_forward(now_ms: i64, floor: i64, what: &str) -> i64 {
    if now_ms < floor {
        warn!(
            "Clock skew: {what} at {now_ms} precedes {floor} by {} ms; clamping",
            floor - now_ms
        );
        floor
    } else {
        now_ms
    }
}

/// Close the open pause at `now_ms`. Returns the new ledger and the new cumulative paused
/// total, or `None` when there is no open entry.
pub(crate) fn close_open_pause(session: &Session, now_ms: i64) -> Option<(Vec<PauseInterval>, u64)> {
    let index = session.pauses.iter().rposition(PauseInterval::is_open)?;
    let mut pauses = session.pauses.clone();
    let start = pauses[index].start;
    let end = clamp_forward(now_ms, start, "pause end");
    pauses[index].end = Some(end);

    let closed_ms = (end - start).max(0) as u64;
    Some((pauses, session.paused_ms.saturating_add(closed_ms)))
}

/// Bring a restored record back in line with the ledger invariants. Returns a description
/// of every repair made; an empty list means the record was already consistent.
///
/// Pauses are kept inside the session and in order: each one starts no earlier than the
/// session start and the end of the pause before it.
pub(crate) fn repair_ledger(session: &mut Session) -> Vec<String> {
    let mut repairs = Vec::new();
    let count = session.pauses.len();
    let mut floor = session.start_ts;

    for index in 0..count {
        let next_start = session.pauses.get(index + 1).map(|next| next.start);
        let pause = &mut session.pauses[index];

        if pause.end.is_none() {
            if let Some(next_start) = next_start {
                let end = next_start.max(pause.start);
                repairs.push(format!(
                    "pause #{index} was left open before a later pause; closed at {end}"
                ));
                pause.end = Some(end);
            }
        }

        if pause.start < floor {
            repairs.push(format!(
                "pause #{index} starts at {} before {floor}; moved to {floor}",
                pause.start
            ));
            pause.start = floor;
        }

        if let Some(end) = pause.end {
            if end < pause.start {
                repairs.push(format!(
                    "pause #{index} ends ({end}) before it starts ({}); truncated to zero",
                    pause.start
                ));
                pause.end = Some(pause.start);
            }
        }
        floor = pause.end.unwrap_or(pause.start);
    }

    let ledger_total = closed_total_ms(&session.pauses);
    if ledger_total != session.paused_ms {
        repairs.push(format!(
            "pausedMs {} disagrees with ledger total {ledger_total}; using ledger",
            session.paused_ms
        ));
        session.paused_ms = ledger_total;
    }

    repairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(pauses: Vec<PauseInterval>, paused_ms: u64) -> Session {
        let mut session = Session::begin("s".into(), "dev".into(), "flow".into(), 1_000);
        session.pauses = pauses;
        session.paused_ms = paused_ms;
        session
    }

    fn closed(start: i64, end: i64) -> PauseInterval {
        PauseInterval {
            start,
            end: Some(end),
        }
    }

    #[test]
    fn consistent_ledger_needs_no_repair() {
        let mut record = session(vec![closed(2_000, 3_000), PauseInterval::open(5_000)], 1_000);
        assert!(repair_ledger(&mut record).is_empty());
        assert_eq!(record.pauses[1].end, None);
    }

    #[test]
    fn extra_open_pause_is_closed_at_next_start() {
        let mut record = session(
            vec![PauseInterval::open(2_000), PauseInterval::open(6_000)],
            0,
        );
        let repairs = repair_ledger(&mut record);
        assert_eq!(repairs.len(), 2);
        assert_eq!(record.pauses[0].end, Some(6_000));
        assert!(record.pauses[1].is_open());
        assert_eq!(record.paused_ms, 4_000);
    }

    #[test]
    fn inverted_interval_is_truncated() {
        let mut record = session(vec![closed(4_000, 3_000)], 0);
        let repairs = repair_ledger(&mut record);
        assert_eq!(repairs.len(), 1);
        assert_eq!(record.pauses[0].end, Some(4_000));
        assert_eq!(record.paused_ms, 0);
    }

    #[test]
    fn pause_before_session_start_is_clipped() {
        let mut record = session(vec![closed(500, 2_000)], 1_500);
        let repairs = repair_ledger(&mut record);
        assert_eq!(repairs.len(), 2);
        assert_eq!(record.pauses[0], closed(1_000, 2_000));
        assert_eq!(record.paused_ms, 1_000);
    }

    #[test]
    fn overlapping_pauses_are_made_sequential() {
        let mut record = session(vec![closed(2_000, 4_000), closed(3_000, 5_000)], 4_000);
        let repairs = repair_ledger(&mut record);
        assert_eq!(repairs.len(), 2);
        assert_eq!(record.pauses[1], closed(4_000, 5_000));
        assert_eq!(record.paused_ms, 3_000);

        // A pause swallowed entirely by its predecessor collapses to nothing.
        let mut record = session(vec![closed(2_000, 4_000), closed(2_500, 3_000)], 2_500);
        repair_ledger(&mut record);
        assert_eq!(record.pauses[1], closed(4_000, 4_000));
        assert_eq!(record.paused_ms, 2_000);

        let mut record = session(vec![closed(2_000, 4_000), PauseInterval::open(3_000)], 2_000);
        repair_ledger(&mut record);
        assert_eq!(record.pauses[1], PauseInterval::open(4_000));
        assert_eq!(record.paused_ms, 2_000);
    }

    #[test]
    fn close_open_pause_never_goes_negative() {
        let record = session(vec![PauseInterval::open(5_000)], 700);
        let (pauses, paused_ms) = close_open_pause(&record, 4_000).unwrap();
        assert_eq!(pauses[0].end, Some(5_000));
        assert_eq!(paused_ms, 700);

        let (_, paused_ms) = close_open_pause(&record, 5_250).unwrap();
        assert_eq!(paused_ms, 950);
        assert!(close_open_pause(&session(Vec::new(), 0), 9_000).is_none());
    }

    #[test]
    fn pause_floor_respects_previous_pause_end() {
        let record = session(vec![closed(2_000, 3_500)], 1_500);
        assert_eq!(pause_floor(&record), 3_500);
        assert_eq!(pause_floor(&session(Vec::new(), 0)), 1_000);
        assert_eq!(clamp_forward(3_000, 3_500, "pause start"), 3_500);
        assert_eq!(clamp_forward(4_000, 3_500, "pause start"), 4_000);
    }
}
