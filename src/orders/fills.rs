/// Fill-price policy for triggered exits
///
/// STRICT models a resting limit order: the fill lands exactly on the
/// configured threshold no matter how far the market gapped through it.
/// MARKET models a market order: the observed tick price less slippage,
/// which deepens drawdowns on gap moves. EOD and forced exits have no
/// threshold and always fill at the observed price.
use crate::types::{ExecutionMode, ExitReason};

pub fn exit_fill_price(
    mode: ExecutionMode,
    reason: ExitReason,
    threshold: Option<f64>,
    observed: f64,
) -> f64 {
    if !reason.is_stop() {
        return observed;
    }
    match mode {
        ExecutionMode::Strict => threshold.unwrap_or(observed),
        ExecutionMode::Market { slippage_pct } => observed * (1.0 - slippage_pct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_fills_at_threshold() {
        // Entry 103.50, 25% initial stop -> threshold 77.625; bar prints 70
        let px = exit_fill_price(
            ExecutionMode::Strict,
            ExitReason::InitialSl,
            Some(77.625),
            70.0,
        );
        assert!((px - 77.625).abs() < 1e-9);
    }

    #[test]
    fn test_market_fills_at_observed_less_slippage() {
        let px = exit_fill_price(
            ExecutionMode::Market {
                slippage_pct: 0.001,
            },
            ExitReason::InitialSl,
            Some(77.625),
            70.0,
        );
        assert!((px - 69.93).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_strict_fill() {
        // Peak 238.80, 10% trail -> threshold 214.92; tick prints 212
        let px = exit_fill_price(
            ExecutionMode::Strict,
            ExitReason::TrailingSl,
            Some(214.92),
            212.0,
        );
        assert!((px - 214.92).abs() < 1e-9);
    }

    #[test]
    fn test_eod_and_forced_use_observed_price() {
        for reason in [ExitReason::Eod, ExitReason::ForcedExit] {
            let strict = exit_fill_price(ExecutionMode::Strict, reason, None, 88.0);
            let market = exit_fill_price(
                ExecutionMode::Market {
                    slippage_pct: 0.001,
                },
                reason,
                None,
                88.0,
            );
            assert_eq!(strict, 88.0);
            assert_eq!(market, 88.0);
        }
    }
}
