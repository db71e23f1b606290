use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::f64::consts::PI;

use crate::error::PipelineError;

/// Date used for every text-file prediction, which carries no date of its own.
/// Mid-June Saturday: peak season, weekend.
pub const FALLBACK_DATE: &str = "2024-06-15";

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    // HTML datetime-local
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a calendar date; a time component, if any, is discarded.
pub fn parse_date(raw: &str) -> Result<NaiveDate, PipelineError> {
    let s = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(PipelineError::DateParse(format!("could not parse {:?} as a date", raw)))
}

/// Parse the `dteday` field of a request, whatever JSON type it arrived as.
pub fn parse_date_value(value: &Value) -> Result<NaiveDate, PipelineError> {
    match value {
        Value::String(s) => parse_date(s),
        other => parse_date(&other.to_string()),
    }
}

/// `(sin(2πv/period), cos(2πv/period))`
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateFeatures {
    pub yr: i32,
    pub mnth: u32,
    /// 0 = Monday .. 6 = Sunday
    pub weekday: u32,
    pub quarter: u32,
    pub is_weekend: u8,
    pub mnth_sin: f64,
    pub mnth_cos: f64,
    pub weekday_sin: f64,
    pub weekday_cos: f64,
}

impl DateFeatures {
    pub fn derive(date: NaiveDate) -> Self {
        let mnth = date.month();
        let weekday = date.weekday().num_days_from_monday();
        let (mnth_sin, mnth_cos) = cyclical(f64::from(mnth), 12.0);
        let (weekday_sin, weekday_cos) = cyclical(f64::from(weekday), 7.0);
        Self {
            yr: date.year(),
            mnth,
            weekday,
            quarter: (mnth - 1) / 3 + 1,
            is_weekend: u8::from(weekday >= 5),
            mnth_sin,
            mnth_cos,
            weekday_sin,
            weekday_cos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourFeatures {
    pub hr_sin: f64,
    pub hr_cos: f64,
}

impl HourFeatures {
    pub fn derive(hour: f64) -> Self {
        let (hr_sin, hr_cos) = cyclical(hour, 24.0);
        Self { hr_sin, hr_cos }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn july_fourth_2024_is_a_thursday() {
        let f = DateFeatures::derive(parse_date("2024-07-04").unwrap());
        assert_eq!(f.yr, 2024);
        assert_eq!(f.mnth, 7);
        assert_eq!(f.weekday, 3);
        assert_eq!(f.quarter, 3);
        assert_eq!(f.is_weekend, 0);
    }

    #[test]
    fn fallback_date_is_a_june_saturday() {
        let f = DateFeatures::derive(parse_date(FALLBACK_DATE).unwrap());
        assert_eq!(f.mnth, 6);
        assert_eq!(f.weekday, 5);
        assert_eq!(f.is_weekend, 1);
        assert_eq!(f.quarter, 2);
    }

    #[test]
    fn weekend_boundary() {
        // 2024-01-01 is a Monday
        for offset in 0..7u32 {
            let f = DateFeatures::derive(date(2024, 1, 1 + offset));
            assert_eq!(f.weekday, offset);
            assert_eq!(f.is_weekend, u8::from(offset >= 5), "weekday {}", offset);
        }
    }

    #[test]
    fn quarters_follow_months() {
        let expected = [1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4];
        for (i, q) in expected.iter().enumerate() {
            let f = DateFeatures::derive(date(2023, i as u32 + 1, 10));
            assert_eq!(f.quarter, *q);
        }
    }

    #[test]
    fn cyclical_pairs_lie_on_unit_circle() {
        for m in 1..=12 {
            let (s, c) = cyclical(f64::from(m), 12.0);
            assert!((s * s + c * c - 1.0).abs() < 1e-12);
        }
        for d in 0..7 {
            let (s, c) = cyclical(f64::from(d), 7.0);
            assert!((s * s + c * c - 1.0).abs() < 1e-12);
        }
        for h in 0..24 {
            let f = HourFeatures::derive(f64::from(h));
            assert!((f.hr_sin * f.hr_sin + f.hr_cos * f.hr_cos - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn december_wraps_to_january() {
        let (s12, c12) = cyclical(12.0, 12.0);
        let (s0, c0) = cyclical(0.0, 12.0);
        assert!((s12 - s0).abs() < 1e-12);
        assert!((c12 - c0).abs() < 1e-12);
    }

    #[test]
    fn accepted_date_shapes() {
        assert_eq!(parse_date("2024/03/09").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_date(" 2024-03-09 ").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_date("2024-03-09T17:45:00").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_date("2024-03-09 17:45:00").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_date("2024-03-09T23:30:00+05:00").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_date("2024-07-04T10:00").unwrap(), date(2024, 7, 4));
        assert_eq!(parse_date("2024-07-04 10:00").unwrap(), date(2024, 7, 4));
        assert_eq!(parse_date("07/04/2024").unwrap(), date(2024, 7, 4));
        assert_eq!(parse_date("20240704").unwrap(), date(2024, 7, 4));
    }

    #[test]
    fn garbage_dates_fail() {
        assert!(matches!(parse_date("not a date"), Err(PipelineError::DateParse(_))));
        assert!(matches!(parse_date("2024-13-40"), Err(PipelineError::DateParse(_))));
        assert!(matches!(parse_date("13/45/2024"), Err(PipelineError::DateParse(_))));
        assert_eq!(parse_date_value(&serde_json::json!(20240704)).unwrap(), date(2024, 7, 4));
        assert!(parse_date_value(&serde_json::json!("2024-07-04")).is_ok());
    }
}
