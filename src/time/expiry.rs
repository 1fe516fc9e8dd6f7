/// Expiry resolution for the configured policy
use chrono::{Datelike, NaiveDate, Weekday};

use crate::types::ExpiryPolicy;

/// Pick the expiry for a trading date from the expiries actually available.
///
/// All policies pick the closest feasible expiry on/after `date`; `monthly`
/// restricts the candidates to each month's last listed expiry. Expiries
/// falling on Monday or Tuesday are skipped when `skip_mon_tue` is set.
/// Returns None when no candidate survives.
pub fn resolve_expiry(
    date: NaiveDate,
    policy: ExpiryPolicy,
    skip_mon_tue: bool,
    available: &[NaiveDate],
) -> Option<NaiveDate> {
    let mut candidates: Vec<NaiveDate> = available
        .iter()
        .copied()
        .filter(|e| *e >= date)
        .filter(|e| !(skip_mon_tue && is_mon_tue(*e)))
        .collect();
    candidates.sort();
    candidates.dedup();

    match policy {
        ExpiryPolicy::Weekly | ExpiryPolicy::Closest => candidates.first().copied(),
        ExpiryPolicy::Monthly => {
            // Last listed expiry of each month is the monthly contract
            let monthlies: Vec<NaiveDate> = candidates
                .iter()
                .copied()
                .filter(|e| {
                    !candidates
                        .iter()
                        .any(|o| o > e && o.year() == e.year() && o.month() == e.month())
                })
                .collect();
            monthlies.first().copied()
        }
    }
}

/// Arithmetic fallback when no listing is available (live quote surface):
/// next Thursday for weekly/closest, last Thursday of the month for monthly.
pub fn next_expiry_from_calendar(
    date: NaiveDate,
    policy: ExpiryPolicy,
    skip_mon_tue: bool,
) -> NaiveDate {
    // skip_mon_tue never bites here since Thursday expiries are assumed,
    // but honor it for instruments that expire early in the week
    let mut candidate = match policy {
        ExpiryPolicy::Weekly | ExpiryPolicy::Closest => next_weekday_on_or_after(date, Weekday::Thu),
        ExpiryPolicy::Monthly => {
            let last = last_weekday_of_month(date.year(), date.month(), Weekday::Thu);
            if last >= date {
                last
            } else {
                let (y, m) = next_month(date.year(), date.month());
                last_weekday_of_month(y, m, Weekday::Thu)
            }
        }
    };

    while skip_mon_tue && is_mon_tue(candidate) {
        candidate = candidate.succ_opt().unwrap();
    }
    candidate
}

fn is_mon_tue(d: NaiveDate) -> bool {
    matches!(d.weekday(), Weekday::Mon | Weekday::Tue)
}

fn next_weekday_on_or_after(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let delta = (7 + weekday.num_days_from_monday() as i64
        - date.weekday().num_days_from_monday() as i64)
        % 7;
    date + chrono::Duration::days(delta)
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let (ny, nm) = next_month(year, month);
    let mut d = NaiveDate::from_ymd_opt(ny, nm, 1).unwrap().pred_opt().unwrap();
    while d.weekday() != weekday {
        d = d.pred_opt().unwrap();
    }
    d
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_closest_future_expiry() {
        let available = vec![d(2025, 6, 5), d(2025, 6, 12), d(2025, 6, 26)];
        assert_eq!(
            resolve_expiry(d(2025, 6, 2), ExpiryPolicy::Weekly, false, &available),
            Some(d(2025, 6, 5))
        );
        // On the expiry day itself, the expiry is still feasible
        assert_eq!(
            resolve_expiry(d(2025, 6, 5), ExpiryPolicy::Closest, false, &available),
            Some(d(2025, 6, 5))
        );
        assert_eq!(
            resolve_expiry(d(2025, 6, 6), ExpiryPolicy::Weekly, false, &available),
            Some(d(2025, 6, 12))
        );
    }

    #[test]
    fn test_skip_mon_tue() {
        // 2025-06-09 is a Monday, 2025-06-10 a Tuesday
        let available = vec![d(2025, 6, 9), d(2025, 6, 10), d(2025, 6, 12)];
        assert_eq!(
            resolve_expiry(d(2025, 6, 6), ExpiryPolicy::Weekly, true, &available),
            Some(d(2025, 6, 12))
        );
        assert_eq!(
            resolve_expiry(d(2025, 6, 6), ExpiryPolicy::Weekly, false, &available),
            Some(d(2025, 6, 9))
        );
    }

    #[test]
    fn test_monthly_picks_last_of_month() {
        let available = vec![d(2025, 6, 5), d(2025, 6, 12), d(2025, 6, 26), d(2025, 7, 31)];
        assert_eq!(
            resolve_expiry(d(2025, 6, 2), ExpiryPolicy::Monthly, false, &available),
            Some(d(2025, 6, 26))
        );
        assert_eq!(
            resolve_expiry(d(2025, 6, 27), ExpiryPolicy::Monthly, false, &available),
            Some(d(2025, 7, 31))
        );
    }

    #[test]
    fn test_no_feasible_expiry() {
        let available = vec![d(2025, 6, 5)];
        assert_eq!(
            resolve_expiry(d(2025, 6, 6), ExpiryPolicy::Weekly, false, &available),
            None
        );
    }

    #[test]
    fn test_calendar_fallback() {
        // 2025-06-02 is a Monday; next Thursday is 2025-06-05
        assert_eq!(
            next_expiry_from_calendar(d(2025, 6, 2), ExpiryPolicy::Weekly, false),
            d(2025, 6, 5)
        );
        // Last Thursday of June 2025 is the 26th
        assert_eq!(
            next_expiry_from_calendar(d(2025, 6, 2), ExpiryPolicy::Monthly, false),
            d(2025, 6, 26)
        );
    }
}
