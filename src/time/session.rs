/// Market session and window utilities (IST)
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use chrono_tz::Asia::Kolkata;

use crate::error::{Result, TradingError};

/// Parse a window boundary, accepting HH:MM or HH:MM:SS
pub fn parse_window_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| TradingError::ConfigError(format!("Invalid time of day: {}", s)))
}

/// Truncate a time of day to minute precision
fn minute_of(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap()
}

/// Check whether `now` falls inside [start, end] in IST.
///
/// Default comparison is at minute precision; seconds are ignored so a tick
/// fetched a few seconds past the boundary still counts. Passing
/// `seconds_precision = true` compares raw times instead.
pub fn within_window(
    now: DateTime<Utc>,
    start: NaiveTime,
    end: NaiveTime,
    seconds_precision: bool,
) -> bool {
    let local = now.with_timezone(&Kolkata).time();
    if seconds_precision {
        local >= start && local <= end
    } else {
        let t = minute_of(local);
        t >= minute_of(start) && t <= minute_of(end)
    }
}

/// Default NSE cash session: 09:15–15:30 IST
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&Kolkata).time();
    let open = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
    let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
    local >= open && local < close
}

/// Weekday check (Mon–Fri)
pub fn is_trading_day(now: DateTime<Utc>) -> bool {
    now.with_timezone(&Kolkata).weekday().num_days_from_monday() < 5
}

/// Trading date of a timestamp in market local time
pub fn trading_date(now: DateTime<Utc>) -> chrono::NaiveDate {
    now.with_timezone(&Kolkata).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(2025, 6, 4, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_window_minute_precision_ignores_seconds() {
        let start = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let end = NaiveTime::from_hms_opt(14, 30, 0).unwrap();

        // 09:30:45 is inside at minute precision even though seconds ran over
        assert!(within_window(ist(9, 30, 45), start, end, false));
        // 14:30:59 still counts as 14:30
        assert!(within_window(ist(14, 30, 59), start, end, false));
        // 14:31:00 does not
        assert!(!within_window(ist(14, 31, 0), start, end, false));
    }

    #[test]
    fn test_window_seconds_precision() {
        let start = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let end = NaiveTime::from_hms_opt(14, 30, 0).unwrap();

        assert!(within_window(ist(14, 30, 0), start, end, true));
        assert!(!within_window(ist(14, 30, 59), start, end, true));
    }

    #[test]
    fn test_market_open() {
        assert!(is_market_open(ist(10, 30, 0)));
        assert!(!is_market_open(ist(9, 0, 0)));
        assert!(!is_market_open(ist(15, 30, 0)));
    }

    #[test]
    fn test_trading_day() {
        // 2025-06-04 is a Wednesday, 2025-06-07 a Saturday
        assert!(is_trading_day(ist(10, 0, 0)));
        let saturday = Kolkata
            .with_ymd_and_hms(2025, 6, 7, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert!(!is_trading_day(saturday));
    }
}
