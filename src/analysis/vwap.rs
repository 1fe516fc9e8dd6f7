/// Session-anchored VWAP tracking for the active contract
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{OptionQuote, OptionType};

/// Running typical-price x volume aggregate for one (strike, type) contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VwapAccumulator {
    pub strike: i32,
    pub option_type: OptionType,
    pub sum_tpv: f64,
    pub sum_volume: i64,
}

impl VwapAccumulator {
    pub fn new(strike: i32, option_type: OptionType) -> Self {
        VwapAccumulator {
            strike,
            option_type,
            sum_tpv: 0.0,
            sum_volume: 0,
        }
    }

    pub fn update(&mut self, quote: &OptionQuote) {
        self.sum_tpv += quote.typical_price() * quote.volume as f64;
        self.sum_volume += quote.volume;
    }

    /// Undefined until any volume has printed
    pub fn vwap(&self) -> Option<f64> {
        if self.sum_volume > 0 {
            Some(self.sum_tpv / self.sum_volume as f64)
        } else {
            None
        }
    }
}

/// Owns the accumulator for the active trading contract. A strike switch
/// discards the old accumulator; a new trading day discards everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VwapBook {
    active: Option<VwapAccumulator>,
}

impl VwapBook {
    /// Point the book at (strike, type), resetting on any switch.
    /// Returns true when the active contract changed.
    pub fn retarget(&mut self, strike: i32, option_type: OptionType) -> bool {
        let switched = !matches!(
            &self.active,
            Some(acc) if acc.strike == strike && acc.option_type == option_type
        );
        if switched {
            if let Some(old) = &self.active {
                debug!(
                    "VWAP reset: {} {} -> {} {}",
                    old.strike,
                    old.option_type.as_str(),
                    strike,
                    option_type.as_str()
                );
            }
            self.active = Some(VwapAccumulator::new(strike, option_type));
        }
        switched
    }

    /// Fold one bar of the active contract into the accumulator
    pub fn update(&mut self, quote: &OptionQuote) {
        if let Some(acc) = &mut self.active {
            if acc.strike == quote.strike && acc.option_type == quote.option_type {
                acc.update(quote);
            }
        }
    }

    pub fn current(&self) -> Option<f64> {
        self.active.as_ref().and_then(|acc| acc.vwap())
    }

    pub fn active_contract(&self) -> Option<(i32, OptionType)> {
        self.active.as_ref().map(|acc| (acc.strike, acc.option_type))
    }

    /// Day rollover: everything goes
    pub fn reset(&mut self) {
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::chain::test_support::quote;

    fn bar(strike: i32, ty: OptionType, h: f64, l: f64, c: f64, volume: i64) -> OptionQuote {
        let mut q = quote(strike, ty, c, 1_000_000);
        q.high = h;
        q.low = l;
        q.close = c;
        q.open = l;
        q.volume = volume;
        q
    }

    #[test]
    fn test_vwap_accumulates_typical_price() {
        let mut book = VwapBook::default();
        assert!(book.retarget(25900, OptionType::Put));

        book.update(&bar(25900, OptionType::Put, 105.0, 95.0, 100.0, 1000));
        // tp = (105 + 95 + 100) / 3 = 100
        assert!((book.current().unwrap() - 100.0).abs() < 1e-9);

        book.update(&bar(25900, OptionType::Put, 125.0, 105.0, 115.0, 3000));
        // tp = 115; vwap = (100*1000 + 115*3000) / 4000 = 111.25
        assert!((book.current().unwrap() - 111.25).abs() < 1e-9);
    }

    #[test]
    fn test_vwap_undefined_without_volume() {
        let mut book = VwapBook::default();
        book.retarget(25900, OptionType::Put);
        assert_eq!(book.current(), None);

        book.update(&bar(25900, OptionType::Put, 105.0, 95.0, 100.0, 0));
        assert_eq!(book.current(), None);
    }

    #[test]
    fn test_strike_switch_resets_accumulator() {
        let mut book = VwapBook::default();
        book.retarget(25900, OptionType::Put);
        book.update(&bar(25900, OptionType::Put, 105.0, 95.0, 100.0, 1000));
        assert!(book.current().is_some());

        // Same contract: no switch, state retained
        assert!(!book.retarget(25900, OptionType::Put));
        assert!(book.current().is_some());

        // New strike: fresh accumulator
        assert!(book.retarget(25850, OptionType::Put));
        assert_eq!(book.current(), None);
        assert_eq!(book.active_contract(), Some((25850, OptionType::Put)));
    }

    #[test]
    fn test_mismatched_bar_ignored() {
        let mut book = VwapBook::default();
        book.retarget(25900, OptionType::Put);
        book.update(&bar(26000, OptionType::Call, 105.0, 95.0, 100.0, 1000));
        assert_eq!(book.current(), None);
    }

    #[test]
    fn test_day_reset() {
        let mut book = VwapBook::default();
        book.retarget(25900, OptionType::Put);
        book.update(&bar(25900, OptionType::Put, 105.0, 95.0, 100.0, 1000));
        book.reset();
        assert_eq!(book.active_contract(), None);
        assert_eq!(book.current(), None);
    }
}
