use chrono::{DateTime, Duration, Utc};

/// Whether a server with the given frequency needs a backup at `now`.
///
/// Only successful runs count as `last_success`; a server that has never
/// succeeded is always due.
pub fn is_due(
    frequency_hrs: u32,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    force: bool,
) -> bool {
    if force {
        return true;
    }

    match last_success {
        Some(last) => now - last >= Duration::hours(i64::from(frequency_hrs)),
        None => true,
    }
}

/// When the server next becomes due, or `None` if it already is.
pub fn next_due(
    frequency_hrs: u32,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let last = last_success?;
    let due_at = last + Duration::hours(i64::from(frequency_hrs));
    (due_at > now).then_some(due_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_never_backed_up_is_due() {
        assert!(is_due(24, None, t0(), false));
    }

    #[test]
    fn test_not_due_inside_window() {
        let last = t0();
        for offset in [Duration::zero(), Duration::hours(1), Duration::hours(24) - Duration::seconds(1)] {
            assert!(!is_due(24, Some(last), last + offset, false));
        }
    }

    #[test]
    fn test_due_at_window_end() {
        let last = t0();
        assert!(is_due(24, Some(last), last + Duration::hours(24), false));
        assert!(is_due(24, Some(last), last + Duration::hours(25), false));
    }

    #[test]
    fn test_force_overrides_window() {
        let last = t0();
        assert!(is_due(24, Some(last), last, true));
        assert!(is_due(24, Some(last), last - Duration::hours(3), true));
    }

    #[test]
    fn test_future_last_success_is_not_due() {
        let last = t0();
        assert!(!is_due(1, Some(last), last - Duration::hours(2), false));
    }

    #[test]
    fn test_next_due() {
        let last = t0();
        assert_eq!(next_due(6, Some(last), last), Some(last + Duration::hours(6)));
        assert_eq!(next_due(6, Some(last), last + Duration::hours(6)), None);
        assert_eq!(next_due(6, None, last), None);
    }
}
