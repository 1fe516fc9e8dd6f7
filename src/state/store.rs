/// Crash-safe JSON state store
///
/// One file per trading day, atomically replaced on every meaningful
/// mutation. Carry-over reads the most recent prior day BEFORE today's file
/// is created, so a fresh empty file can never shadow yesterday's close.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analysis::VwapBook;
use crate::error::{Result, TradingError};
use crate::types::{DailyContext, DailyStats, OptionType, Portfolio, Position, RunMode, SystemHealth};

/// Previous-bar OI observation for one contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiPoint {
    pub strike: i32,
    pub option_type: OptionType,
    pub oi: i64,
}

/// Strategy block of the persisted state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyState {
    pub context: DailyContext,
    pub vwap: VwapBook,
    pub last_oi: Vec<OiPoint>,
}

/// Full content of one day's state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub date: NaiveDate,
    pub session_id: String,
    pub mode: RunMode,
    pub active_positions: HashMap<String, Position>,
    pub closed_positions: Vec<Position>,
    pub strategy_state: StrategyState,
    pub daily_stats: DailyStats,
    pub portfolio: Portfolio,
    pub system_health: SystemHealth,
}

impl PersistedState {
    /// Clamp non-finite floats to representable values so serialization can
    /// never fail or round-trip into nulls. Infinite OI distances become
    /// f64::MAX; anything NaN becomes zero.
    pub fn normalized(mut self) -> Self {
        fn fix(x: &mut f64) {
            if x.is_nan() {
                *x = 0.0;
            } else if x.is_infinite() {
                *x = if *x > 0.0 { f64::MAX } else { f64::MIN };
            }
        }
        fn fix_opt(x: &mut Option<f64>) {
            if let Some(v) = x {
                fix(v);
            }
        }

        let ctx = &mut self.strategy_state.context;
        fix_opt(&mut ctx.call_distance);
        fix_opt(&mut ctx.put_distance);

        for p in self
            .active_positions
            .values_mut()
            .chain(self.closed_positions.iter_mut())
        {
            fix(&mut p.entry_price);
            fix(&mut p.entry_vwap);
            fix(&mut p.peak_price);
            fix_opt(&mut p.exit_price);
            fix_opt(&mut p.pnl);
            fix_opt(&mut p.pnl_pct);
        }

        fix(&mut self.portfolio.initial_capital);
        fix(&mut self.portfolio.cash);
        fix(&mut self.portfolio.positions_value);
        fix(&mut self.portfolio.total_value);
        fix(&mut self.portfolio.total_return_pct);
        fix(&mut self.daily_stats.gross_pnl);
        fix(&mut self.daily_stats.commission_paid);

        self
    }
}

/// What startup should do with a day's existing file
#[derive(Debug)]
pub enum RecoveryDecision {
    /// No usable state: start clean
    Fresh,
    /// Open positions on disk: resume without asking, abandoning them loses value
    Forced(PersistedState),
    /// Closed trades or a used trade budget: let the operator decide
    Prompt(PersistedState),
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(StateStore {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("trading_state_{}.json", date.format("%Y%m%d")))
    }

    /// Atomically replace the day file. The state is normalized before
    /// serialization (non-finite floats would otherwise round-trip into
    /// nulls); a serialization failure retries once before escalating.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let normalized = state.clone().normalized();
        let json = match serde_json::to_string_pretty(&normalized) {
            Ok(json) => json,
            Err(first_err) => {
                warn!("State serialization failed ({}), retrying once", first_err);
                serde_json::to_string_pretty(&normalized).map_err(|e| {
                    TradingError::StateStoreError(format!(
                        "state save failed even after normalization: {}",
                        e
                    ))
                })?
            }
        };

        let path = self.day_file(state.date);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load one day's file if present
    pub fn load(&self, date: NaiveDate) -> Result<Option<PersistedState>> {
        let path = self.day_file(date);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let state: PersistedState = serde_json::from_str(&content)
            .map_err(|e| TradingError::RecoveryFailed(format!("corrupt state file: {}", e)))?;
        Ok(Some(state))
    }

    /// Most recent state file strictly before `date`
    pub fn latest_prior(&self, date: NaiveDate) -> Result<Option<PersistedState>> {
        let mut best: Option<NaiveDate> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = name
                .strip_prefix("trading_state_")
                .and_then(|s| s.strip_suffix(".json"))
            else {
                continue;
            };
            let Ok(file_date) = NaiveDate::parse_from_str(stamp, "%Y%m%d") else {
                continue;
            };
            if file_date < date && best.map_or(true, |b| file_date > b) {
                best = Some(file_date);
            }
        }

        match best {
            Some(prior) => self.load(prior),
            None => Ok(None),
        }
    }

    /// Session capital for a new day: yesterday's ending cash when a prior
    /// file exists, otherwise the configured capital. Must run before the
    /// new day's file is created.
    pub fn carry_over_capital(&self, date: NaiveDate, configured: f64) -> Result<f64> {
        match self.latest_prior(date)? {
            Some(prior) => {
                info!(
                    "Carrying over capital {:.2} from {}",
                    prior.portfolio.cash, prior.date
                );
                Ok(prior.portfolio.cash)
            }
            None => Ok(configured),
        }
    }

    /// Recovery decision for today's file, if any
    pub fn decide_recovery(&self, date: NaiveDate) -> Result<RecoveryDecision> {
        let Some(state) = self.load(date)? else {
            return Ok(RecoveryDecision::Fresh);
        };

        if !state.active_positions.is_empty() {
            info!(
                "Found {} open positions for {}: recovery is forced",
                state.active_positions.len(),
                date
            );
            return Ok(RecoveryDecision::Forced(state));
        }

        if !state.closed_positions.is_empty() || state.daily_stats.trades_today > 0 {
            return Ok(RecoveryDecision::Prompt(state));
        }

        Ok(RecoveryDecision::Fresh)
    }

}
