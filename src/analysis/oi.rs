/// Open-interest analysis: band selection, max-OI strikes, direction,
/// and the dynamic trading strike
use tracing::debug;

use crate::data::chain::OptionsSnapshot;
use crate::error::{Result, TradingError};
use crate::types::OptionType;

/// Result of one OI analysis pass
#[derive(Debug, Clone)]
pub struct OiAnalysis {
    pub max_call_oi_strike: Option<i32>,
    pub max_put_oi_strike: Option<i32>,
    /// Signed distances; an unavailable side is +infinity
    pub call_distance: f64,
    pub put_distance: f64,
    pub direction: OptionType,
    pub trading_strike: i32,
}

/// Strikes forming the analysis band: the `strikes_below` highest strikes
/// strictly below spot plus the `strikes_above` lowest strikes at/above spot.
pub fn analysis_band(
    snapshot: &OptionsSnapshot,
    spot: f64,
    strikes_below: usize,
    strikes_above: usize,
) -> Vec<i32> {
    let strikes = snapshot.strikes();

    let mut below: Vec<i32> = strikes
        .iter()
        .copied()
        .filter(|s| (*s as f64) < spot)
        .collect();
    below.sort_unstable_by(|a, b| b.cmp(a));
    below.truncate(strikes_below);

    let mut above: Vec<i32> = strikes
        .iter()
        .copied()
        .filter(|s| (*s as f64) >= spot)
        .collect();
    above.sort_unstable();
    above.truncate(strikes_above);

    let mut band: Vec<i32> = below.into_iter().chain(above).collect();
    band.sort_unstable();
    band
}

/// Run the full analysis for one snapshot.
///
/// Direction falls to PUT on ties. The trading strike is the nearest
/// out-of-the-money strike for the chosen direction: smallest strike at/above
/// spot for CALL, largest strike below spot for PUT.
pub fn analyze(
    snapshot: &OptionsSnapshot,
    spot: f64,
    strikes_below: usize,
    strikes_above: usize,
) -> Result<OiAnalysis> {
    let band = analysis_band(snapshot, spot, strikes_below, strikes_above);
    if !snapshot.is_usable(&band) {
        return Err(TradingError::UnusableSnapshot(format!(
            "band of {} strikes around {:.2} is incomplete",
            band.len(),
            spot
        )));
    }

    let max_call_oi_strike = max_oi_strike(snapshot, &band, OptionType::Call);
    let max_put_oi_strike = max_oi_strike(snapshot, &band, OptionType::Put);

    let call_distance = max_call_oi_strike
        .map(|s| s as f64 - spot)
        .unwrap_or(f64::INFINITY);
    let put_distance = max_put_oi_strike
        .map(|s| spot - s as f64)
        .unwrap_or(f64::INFINITY);

    let direction = if call_distance < put_distance {
        OptionType::Call
    } else {
        OptionType::Put
    };

    let trading_strike = trading_strike(snapshot, spot, direction).ok_or_else(|| {
        TradingError::NoTradableStrike(format!(
            "no {} strike around spot {:.2}",
            direction.as_str(),
            spot
        ))
    })?;

    debug!(
        "OI analysis: call max {:?} (d={:.2}), put max {:?} (d={:.2}) -> {} @ {}",
        max_call_oi_strike,
        call_distance,
        max_put_oi_strike,
        put_distance,
        direction.as_str(),
        trading_strike
    );

    Ok(OiAnalysis {
        max_call_oi_strike,
        max_put_oi_strike,
        call_distance,
        put_distance,
        direction,
        trading_strike,
    })
}

fn max_oi_strike(snapshot: &OptionsSnapshot, band: &[i32], option_type: OptionType) -> Option<i32> {
    band.iter()
        .filter_map(|s| snapshot.get(*s, option_type).map(|q| (*s, q.oi)))
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(s, _)| s)
}

/// Nearest out-of-the-money strike for the direction
pub fn trading_strike(snapshot: &OptionsSnapshot, spot: f64, direction: OptionType) -> Option<i32> {
    let strikes = snapshot.strikes();
    match direction {
        OptionType::Call => strikes
            .iter()
            .copied()
            .filter(|s| *s as f64 >= spot)
            .min(),
        OptionType::Put => strikes
            .iter()
            .copied()
            .filter(|s| (*s as f64) < spot)
            .max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::chain::test_support::snapshot_with;

    /// Grid of strikes with both types; custom OI on the two leaders
    fn scenario_snapshot() -> OptionsSnapshot {
        let mut rows = Vec::new();
        for strike in (25700..=26200).step_by(50) {
            let call_oi = if strike == 26000 { 2_500_000 } else { 800_000 };
            let put_oi = if strike == 25900 { 1_897_000 } else { 700_000 };
            rows.push((strike, OptionType::Call, 100.0, call_oi));
            rows.push((strike, OptionType::Put, 95.0, put_oi));
        }
        snapshot_with(25946.95, &rows)
    }

    #[test]
    fn test_direction_flips_to_put_at_first_analysis() {
        // Spot 25946.95: call leader 26000 is 53.05 away, put leader 25900
        // is 46.95 away, so momentum favours PUT at strike 25900.
        let snap = scenario_snapshot();
        let analysis = analyze(&snap, 25946.95, 5, 5).unwrap();

        assert_eq!(analysis.max_call_oi_strike, Some(26000));
        assert_eq!(analysis.max_put_oi_strike, Some(25900));
        assert!((analysis.call_distance - 53.05).abs() < 1e-9);
        assert!((analysis.put_distance - 46.95).abs() < 1e-9);
        assert_eq!(analysis.direction, OptionType::Put);
        assert_eq!(analysis.trading_strike, 25900);
    }

    #[test]
    fn test_call_direction_and_strike() {
        let mut rows = Vec::new();
        for strike in (25700..=26200).step_by(50) {
            let call_oi = if strike == 25950 { 3_000_000 } else { 800_000 };
            let put_oi = if strike == 25700 { 2_000_000 } else { 700_000 };
            rows.push((strike, OptionType::Call, 100.0, call_oi));
            rows.push((strike, OptionType::Put, 95.0, put_oi));
        }
        let snap = snapshot_with(25946.95, &rows);

        let analysis = analyze(&snap, 25946.95, 5, 5).unwrap();
        assert_eq!(analysis.direction, OptionType::Call);
        // Smallest strike at/above spot
        assert_eq!(analysis.trading_strike, 25950);
    }

    #[test]
    fn test_tie_breaks_to_put() {
        let mut rows = Vec::new();
        for strike in &[25900, 25950, 26000] {
            // Leaders equidistant from spot 25950: call at 26000, put at 25900
            let call_oi = if *strike == 26000 { 2_000_000 } else { 500_000 };
            let put_oi = if *strike == 25900 { 2_000_000 } else { 500_000 };
            rows.push((*strike, OptionType::Call, 100.0, call_oi));
            rows.push((*strike, OptionType::Put, 95.0, put_oi));
        }
        let snap = snapshot_with(25950.0, &rows);

        let analysis = analyze(&snap, 25950.0, 5, 5).unwrap();
        assert!((analysis.call_distance - analysis.put_distance).abs() < 1e-9);
        assert_eq!(analysis.direction, OptionType::Put);
    }

    #[test]
    fn test_band_selection() {
        let snap = scenario_snapshot();
        let band = analysis_band(&snap, 25946.95, 2, 2);
        assert_eq!(band, vec![25850, 25900, 25950, 26000]);

        // Fewer strikes below spot than requested: band shrinks
        let band = analysis_band(&snap, 25720.0, 5, 2);
        assert_eq!(band, vec![25700, 25750, 25800]);
    }

    #[test]
    fn test_incomplete_band_is_unusable() {
        let rows = vec![
            (25900, OptionType::Call, 100.0, 1_000_000),
            (25900, OptionType::Put, 95.0, 1_000_000),
            (25950, OptionType::Call, 90.0, 900_000),
            // 25950 PUT missing
        ];
        let snap = snapshot_with(25946.95, &rows);
        let err = analyze(&snap, 25946.95, 5, 5).unwrap_err();
        assert!(matches!(err, TradingError::UnusableSnapshot(_)));
    }

    #[test]
    fn test_no_tradable_strike_below_grid() {
        // Every strike sits at/above spot, so a PUT leader cannot trade
        let rows = vec![
            (26000, OptionType::Call, 100.0, 500_000),
            (26000, OptionType::Put, 95.0, 2_000_000),
            (26050, OptionType::Call, 90.0, 400_000),
            (26050, OptionType::Put, 85.0, 300_000),
        ];
        let snap = snapshot_with(25990.0, &rows);
        let err = analyze(&snap, 25990.0, 5, 5).unwrap_err();
        assert!(matches!(err, TradingError::NoTradableStrike(_)));
    }
}
