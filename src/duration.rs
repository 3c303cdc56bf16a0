//! Pure duration helpers shared by the console, history views and analytics.

use crate::models::Session;
use crate::timer::TimerError;

/// `m:ss` below an hour, `h:mm:ss` from an hour up. The leading unit is not padded.
pub fn format_duration(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Focused time of a finished session: `endTs - startTs - pausedMs`.
///
/// An open session (`endTs` unset) yields 0; live elapsed time comes from the timer. A
/// negative result means the pause ledger is broken and is reported as `CorruptRecord`.
pub fn calculate_actual_duration(session: &Session) -> Result<u64, TimerError> {
    let Some(end_ts) = session.end_ts else {
        return Ok(0);
    };

    let wall_ms = i128::from(end_ts) - i128::from(session.start_ts);
    let actual = wall_ms - i128::from(session.paused_ms);
    if actual < 0 {
        return Err(TimerError::CorruptRecord(format!(
            "session {} has negative duration: end {} - start {} - paused {} = {actual}",
            session.id, end_ts, session.start_ts, session.paused_ms
        )));
    }

    Ok(u64::try_from(actual).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(start_ts: i64, end_ts: Option<i64>, paused_ms: u64) -> Session {
        let mut session = Session::begin("s".into(), "dev".into(), "flow".into(), start_ts);
        session.end_ts = end_ts;
        session.running = end_ts.is_none();
        session.paused_ms = paused_ms;
        session
    }

    #[test]
    fn formats_minutes_and_hours() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(999), "0:00");
        assert_eq!(format_duration(61_000), "1:01");
        assert_eq!(format_duration(59 * 60_000 + 59_000), "59:59");
        assert_eq!(format_duration(3_600_000), "1:00:00");
        assert_eq!(format_duration(3_661_000), "1:01:01");
        assert_eq!(format_duration(36_000_000), "10:00:00");
    }

    #[test]
    fn open_session_has_no_actual_duration() {
        let session = finished(1_000_000, None, 123_456);
        assert_eq!(calculate_actual_duration(&session).unwrap(), 0);
    }

    #[test]
    fn actual_duration_excludes_pauses() {
        let session = finished(1_000_000, Some(1_010_000), 2_000);
        assert_eq!(calculate_actual_duration(&session).unwrap(), 8_000);
    }

    #[test]
    fn negative_duration_is_a_corrupt_record() {
        let session = finished(1_000_000, Some(1_001_000), 5_000);
        let err = calculate_actual_duration(&session).unwrap_err();
        assert!(matches!(err, TimerError::CorruptRecord(_)));
    }
}
