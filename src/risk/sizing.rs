/// Risk-based position sizing with lot rounding
use tracing::debug;

/// Units to buy for one entry, or None when even a single lot does not fit.
///
/// Risk budget is a fixed fraction of session capital; the per-unit risk is
/// the distance to the initial stop. Units round down to whole lots (at
/// least one) and then shrink until the notional fits in available cash.
pub fn position_size(
    initial_capital: f64,
    risk_per_trade_pct: f64,
    entry_price: f64,
    initial_stop_pct: f64,
    lot_size: i32,
    cash: f64,
) -> Option<i32> {
    if entry_price <= 0.0 || initial_stop_pct <= 0.0 || lot_size <= 0 {
        return None;
    }

    let risk_amount = initial_capital * risk_per_trade_pct;
    let risk_per_unit = entry_price * initial_stop_pct;
    let raw_units = (risk_amount / risk_per_unit).floor() as i64;

    let mut lots = (raw_units / lot_size as i64).max(1);
    while lots > 0 && lots as f64 * lot_size as f64 * entry_price > cash {
        lots -= 1;
    }

    if lots == 0 {
        debug!(
            "Sizing rejected: one lot of {} @ {:.2} exceeds cash {:.2}",
            lot_size, entry_price, cash
        );
        return None;
    }

    let units = (lots * lot_size as i64) as i32;
    debug!(
        "Sized {} units ({} lots): risk {:.2}, per-unit {:.4}",
        units, lots, risk_amount, risk_per_unit
    );
    Some(units)
}
