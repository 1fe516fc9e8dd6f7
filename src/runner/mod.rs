pub mod backtest;
pub mod live;

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub use backtest::{BacktestReport, BacktestRunner};
pub use live::LiveRunner;

use crate::error::TradingError;
use crate::events::EventBus;
use crate::positions::Ledger;
use crate::state::{PersistedState, StateStore, TradeLog, TradeRecord};
use crate::strategy::{ExitMarket, StrategyEngine};
use crate::types::{Config, Position, SystemHealth};

/// How a run ended, for the host process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// Assemble the persisted view of the session at `heartbeat_at`
pub(crate) fn build_state(
    config: &Config,
    session_id: &str,
    date: NaiveDate,
    session_started: DateTime<Utc>,
    heartbeat_at: DateTime<Utc>,
    engine: &StrategyEngine,
    ledger: &Ledger,
) -> PersistedState {
    PersistedState {
        date,
        session_id: session_id.to_string(),
        mode: config.mode,
        active_positions: ledger.active_map().clone(),
        closed_positions: ledger.closed_positions().to_vec(),
        strategy_state: engine.export_state(),
        daily_stats: ledger.daily_stats(date),
        portfolio: ledger.portfolio.clone(),
        system_health: SystemHealth {
            last_heartbeat: Some(heartbeat_at),
            session_started: Some(session_started),
        },
    }
}

/// Persist the current session view; persistence failures are logged and
/// swallowed so a disk hiccup never kills the trading loops.
#[allow(clippy::too_many_arguments)]
pub(crate) fn persist(
    store: &StateStore,
    config: &Config,
    session_id: &str,
    date: NaiveDate,
    session_started: DateTime<Utc>,
    heartbeat_at: DateTime<Utc>,
    engine: &StrategyEngine,
    ledger: &Ledger,
) {
    let state = build_state(
        config,
        session_id,
        date,
        session_started,
        heartbeat_at,
        engine,
        ledger,
    );
    if let Err(e) = store.save(&state) {
        warn!("State persistence failed: {}", e);
    }
}

/// Drain the engine's event buffer into the journal
pub(crate) async fn publish_events(bus: &Arc<EventBus>, engine: &mut StrategyEngine) {
    for event in engine.take_events() {
        match bus.publish(event).await {
            Ok(()) | Err(TradingError::DuplicateEvent(_)) => {}
            Err(e) => warn!("Event publish failed: {}", e),
        }
    }
}

/// Write closed trades to the session and cumulative logs
pub(crate) fn record_trades(
    trade_log: &TradeLog,
    engine: &StrategyEngine,
    closed: &[Position],
    market: &HashMap<String, ExitMarket>,
) {
    for position in closed {
        let oi_at_exit = market
            .get(&position.order_id)
            .and_then(|m| m.current_oi)
            .unwrap_or(0);
        let vwap_at_exit = engine.vwap.current().unwrap_or(0.0);
        let oi_change = engine.entry_oi_change(&position.order_id);

        if let Some(record) =
            TradeRecord::from_closed(position, vwap_at_exit, oi_change, oi_at_exit)
        {
            if let Err(e) = trade_log.append(&record) {
                warn!("Trade log append failed: {}", e);
            }
        }
    }
}
