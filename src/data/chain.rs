/// Options-chain snapshot indexed by (strike, type)
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

use crate::types::{OptionQuote, OptionType};

/// All quotes for one timestamp and one expiry, addressable by contract
#[derive(Debug, Clone)]
pub struct OptionsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub spot: f64,
    pub expiry: NaiveDate,
    quotes: BTreeMap<(i32, OptionType), OptionQuote>,
}

impl OptionsSnapshot {
    pub fn new(timestamp: DateTime<Utc>, spot: f64, expiry: NaiveDate) -> Self {
        OptionsSnapshot {
            timestamp,
            spot,
            expiry,
            quotes: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, quote: OptionQuote) {
        self.quotes.insert((quote.strike, quote.option_type), quote);
    }

    pub fn get(&self, strike: i32, option_type: OptionType) -> Option<&OptionQuote> {
        self.quotes.get(&(strike, option_type))
    }

    pub fn has_both_types(&self, strike: i32) -> bool {
        self.quotes.contains_key(&(strike, OptionType::Call))
            && self.quotes.contains_key(&(strike, OptionType::Put))
    }

    /// Distinct strikes present, ascending
    pub fn strikes(&self) -> Vec<i32> {
        let mut strikes: Vec<i32> = self.quotes.keys().map(|(s, _)| *s).collect();
        strikes.dedup();
        strikes
    }

    /// A snapshot is usable only if every banded strike quotes both types
    pub fn is_usable(&self, band: &[i32]) -> bool {
        !band.is_empty() && band.iter().all(|s| self.has_both_types(*s))
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn quote(strike: i32, option_type: OptionType, close: f64, oi: i64) -> OptionQuote {
        let timestamp = Utc.with_ymd_and_hms(2025, 6, 4, 4, 0, 0).unwrap();
        OptionQuote {
            timestamp,
            strike,
            option_type,
            expiry: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
            open: close,
            high: close * 1.02,
            low: close * 0.98,
            close,
            volume: 10_000,
            oi,
            underlying: 25000.0,
            iv: 14.0,
            delta: 0.4,
        }
    }

    pub fn snapshot_with(spot: f64, entries: &[(i32, OptionType, f64, i64)]) -> OptionsSnapshot {
        let timestamp = Utc.with_ymd_and_hms(2025, 6, 4, 4, 0, 0).unwrap();
        let mut snap =
            OptionsSnapshot::new(timestamp, spot, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
        for (strike, ty, close, oi) in entries {
            snap.insert(quote(*strike, *ty, *close, *oi));
        }
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_snapshot_lookup_and_usability() {
        let snap = snapshot_with(
            25000.0,
            &[
                (24950, OptionType::Call, 120.0, 1000),
                (24950, OptionType::Put, 80.0, 1500),
                (25000, OptionType::Call, 95.0, 2000),
            ],
        );

        assert_eq!(snap.get(24950, OptionType::Put).unwrap().close, 80.0);
        assert!(snap.has_both_types(24950));
        assert!(!snap.has_both_types(25000));

        assert!(snap.is_usable(&[24950]));
        assert!(!snap.is_usable(&[24950, 25000]));
        assert!(!snap.is_usable(&[]));
    }
}
