use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

/// Week key for the calendar week containing `at`, in `YYYY-Www` form.
///
/// Weeks are Monday-first and numbered `00`-`53` within the calendar year, so
/// string order matches chronological order. Days before the first Monday of
/// January fall into week `00`.
pub fn week_key_for(at: DateTime<Utc>) -> String {
    at.format("%Y-W%W").to_string()
}

pub fn is_canonical_week_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    if bytes.len() != 8 || bytes[4] != b'-' || bytes[5] != b'W' {
        return false;
    }

    let digits = bytes[..4].iter().chain(&bytes[6..]);
    if !digits.into_iter().all(u8::is_ascii_digit) {
        return false;
    }

    key[6..].parse::<u32>().is_ok_and(|week| week <= 53)
}

/// The seven-day window a report generated at a given instant covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
}

impl ReportWindow {
    pub fn ending_at(at: DateTime<Utc>) -> Self {
        let week_end = at.date_naive();
        Self {
            week_start: week_end - Duration::days(7),
            week_end,
        }
    }
}

pub fn week_label(at: DateTime<Utc>) -> String {
    format!("Week {} of {}", at.format("%W"), at.format("%Y"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_week_key_zero_padded() {
        assert_eq!(week_key_for(utc(2025, 1, 6)), "2025-W01");
        assert_eq!(week_key_for(utc(2025, 10, 6)), "2025-W40");
    }

    #[test]
    fn test_week_key_before_first_monday_is_week_zero() {
        // 2023-01-01 is a Sunday
        assert_eq!(week_key_for(utc(2023, 1, 1)), "2023-W00");
    }

    #[test]
    fn test_week_keys_sort_chronologically_across_new_year() {
        let days = [
            utc(2024, 12, 30),
            utc(2024, 12, 31),
            utc(2025, 1, 1),
            utc(2025, 1, 6),
            utc(2025, 2, 14),
        ];
        let keys: Vec<String> = days.iter().map(|d| week_key_for(*d)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_canonical_week_key() {
        assert!(is_canonical_week_key("2025-W40"));
        assert!(is_canonical_week_key("2023-W00"));
        assert!(is_canonical_week_key("2020-W53"));
        assert!(!is_canonical_week_key("2025-W54"));
        assert!(!is_canonical_week_key("2025-W4"));
        assert!(!is_canonical_week_key("2025W040"));
        assert!(!is_canonical_week_key("20x5-W40"));
        assert!(!is_canonical_week_key("2025-Wé"));
        assert!(!is_canonical_week_key(""));
    }

    #[test]
    fn test_generated_keys_are_canonical() {
        for day in [utc(2023, 1, 1), utc(2024, 12, 31), utc(2026, 10, 14)] {
            assert!(is_canonical_week_key(&week_key_for(day)));
        }
    }

    #[test]
    fn test_report_window_covers_previous_seven_days() {
        let window = ReportWindow::ending_at(utc(2025, 10, 6));
        assert_eq!(window.week_end, NaiveDate::from_ymd_opt(2025, 10, 6).unwrap());
        assert_eq!(window.week_start, NaiveDate::from_ymd_opt(2025, 9, 29).unwrap());
    }

    #[test]
    fn test_week_label() {
        assert_eq!(week_label(utc(2025, 10, 6)), "Week 40 of 2025");
    }
}
