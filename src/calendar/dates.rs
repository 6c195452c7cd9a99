use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn non_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9]").expect("static regex"))
}

/// Best-effort date extraction for the inconsistently formatted date
/// fields coming from the holiday API and older remote records.
pub fn parse_iso_to_local_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(head) = trimmed.get(..10)
        && let Ok(date) = NaiveDate::parse_from_str(head, DATE_FORMAT)
    {
        return Some(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Local).date_naive());
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt.date());
        }
    }

    let digits = non_digits().replace_all(trimmed, "");
    digits
        .get(..8)
        .and_then(|ymd| NaiveDate::parse_from_str(ymd, "%Y%m%d").ok())
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn parses_plain_date() {
        assert_eq!(parse_iso_to_local_date("2025-11-19"), Some(date(2025, 11, 19)));
    }

    #[test]
    fn parses_utc_datetime() {
        assert_eq!(parse_iso_to_local_date("2025-11-19T10:00:00Z"), Some(date(2025, 11, 19)));
    }

    #[test]
    fn parses_offset_datetime() {
        assert_eq!(
            parse_iso_to_local_date("2025-11-19T10:00:00+02:00"),
            Some(date(2025, 11, 19))
        );
    }

    #[test]
    fn parses_slash_separated_date_with_heuristic() {
        assert_eq!(parse_iso_to_local_date("2025/11/19"), Some(date(2025, 11, 19)));
    }

    #[test]
    fn parses_compact_date() {
        assert_eq!(parse_iso_to_local_date("20251119"), Some(date(2025, 11, 19)));
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(parse_iso_to_local_date("  2025-01-02 "), Some(date(2025, 1, 2)));
    }

    #[test]
    fn empty_input_is_none() {
        assert_eq!(parse_iso_to_local_date(""), None);
        assert_eq!(parse_iso_to_local_date("   "), None);
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_iso_to_local_date("garbage"), None);
        assert_eq!(parse_iso_to_local_date("2025-13-45"), None);
        assert_eq!(parse_iso_to_local_date("12"), None);
    }

    #[test]
    fn multibyte_input_does_not_panic() {
        assert_eq!(parse_iso_to_local_date("日付日付日付日付"), None);
    }

    proptest! {
        #[test]
        fn formatted_dates_parse_back(days in 0i64..60_000) {
            let original = date(1970, 1, 1) + chrono::Duration::days(days);

            prop_assert_eq!(parse_iso_to_local_date(&format_iso_date(original)), Some(original));
            let with_time = format!("{}T08:30:00Z", format_iso_date(original));
            prop_assert_eq!(parse_iso_to_local_date(&with_time), Some(original));
        }
    }
}
