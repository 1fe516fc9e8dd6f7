/// Position ledger and paper-broker simulation
///
/// The only component that moves cash or mutates positions. Entries and
/// exits both settle here; the configured fill policy is applied to a
/// triggered stop before the price becomes the recorded exit price.
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::{Result, TradingError};
use crate::orders::fills::exit_fill_price;
use crate::time::trading_date;
use crate::types::{
    Config, DailyStats, ExecutionMode, ExitReason, OptionType, Portfolio, Position, PositionStatus,
};

/// Everything the ledger needs to open a position
#[derive(Debug, Clone)]
pub struct EntryOrder {
    pub symbol: String,
    pub strike: i32,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    pub size: i32,
    pub price: f64,
    pub entry_vwap: f64,
    pub entry_oi: i64,
}

pub struct Ledger {
    commission: f64,
    max_positions: usize,
    max_trades_per_day: u32,
    fill_mode: ExecutionMode,
    profit_threshold_ratio: f64,

    pub portfolio: Portfolio,
    active: HashMap<String, Position>,
    closed: Vec<Position>,

    order_date: Option<NaiveDate>,
    order_seq: u32,
    trades_today: u32,
}

impl Ledger {
    pub fn new(config: &Config, session_capital: f64) -> Self {
        Ledger {
            commission: config.commission,
            max_positions: config.max_positions,
            max_trades_per_day: config.max_trades_per_day,
            fill_mode: config.fill_mode(),
            profit_threshold_ratio: config.profit_threshold_ratio,
            portfolio: Portfolio::new(session_capital),
            active: HashMap::new(),
            closed: Vec::new(),
            order_date: None,
            order_seq: 0,
            trades_today: 0,
        }
    }

    /// Open a position after the entry gates pass
    pub fn open(&mut self, order: EntryOrder, t: DateTime<Utc>) -> Result<Position> {
        if order.size <= 0 {
            return Err(TradingError::OrderRejected(format!(
                "non-positive size {}",
                order.size
            )));
        }
        if self.active.len() >= self.max_positions {
            return Err(TradingError::PositionLimitExceeded(format!(
                "{} open positions",
                self.active.len()
            )));
        }
        if self.trades_today >= self.max_trades_per_day {
            return Err(TradingError::TradeLimitExceeded(format!(
                "{} trades today",
                self.trades_today
            )));
        }

        let cost = order.size as f64 * order.price;
        if cost + self.commission > self.portfolio.cash {
            return Err(TradingError::InsufficientCash(format!(
                "need {:.2}, have {:.2}",
                cost + self.commission,
                self.portfolio.cash
            )));
        }

        let date = trading_date(t);
        if self.order_date != Some(date) {
            self.order_date = Some(date);
            self.order_seq = 0;
        }
        self.order_seq += 1;
        let order_id = format!("PAPER_{}_{:03}", date.format("%Y%m%d"), self.order_seq);

        let position = Position {
            order_id: order_id.clone(),
            symbol: order.symbol,
            strike: order.strike,
            option_type: order.option_type,
            expiry: order.expiry,
            entry_time: t,
            entry_price: order.price,
            size: order.size,
            entry_vwap: order.entry_vwap,
            entry_oi: order.entry_oi,
            peak_price: order.price,
            trailing_active: false,
            status: PositionStatus::Open,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            pnl: None,
            pnl_pct: None,
        };

        self.portfolio.cash -= cost + self.commission;
        self.active.insert(order_id.clone(), position.clone());
        self.trades_today += 1;
        self.portfolio.revalue(&self.active);

        info!(
            "Opened {}: {} x {} @ {:.2} (cash {:.2})",
            order_id, position.symbol, position.size, position.entry_price, self.portfolio.cash
        );

        Ok(position)
    }

    /// Fold a fresh tick into the position: ratchet the peak, arm trailing
    /// once the profit threshold is crossed. Trailing never disarms.
    pub fn mark(&mut self, order_id: &str, ltp: f64) -> Result<()> {
        let position = self
            .active
            .get_mut(order_id)
            .ok_or_else(|| TradingError::PositionNotFound(order_id.to_string()))?;

        if ltp > position.peak_price {
            position.peak_price = ltp;
        }
        if !position.trailing_active
            && ltp >= position.entry_price * self.profit_threshold_ratio
        {
            position.trailing_active = true;
            info!(
                "Trailing armed for {} at {:.2} (entry {:.2})",
                order_id, ltp, position.entry_price
            );
        }
        Ok(())
    }

    /// Close a position. `observed` is the tick price; stop-triggered
    /// reasons pass the stop `threshold` and the fill policy decides what
    /// actually prints.
    pub fn close(
        &mut self,
        order_id: &str,
        observed: f64,
        threshold: Option<f64>,
        t: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<Position> {
        let mut position = self
            .active
            .remove(order_id)
            .ok_or_else(|| TradingError::PositionNotFound(order_id.to_string()))?;

        let exit_price = exit_fill_price(self.fill_mode, reason, threshold, observed);
        let pnl = (exit_price - position.entry_price) * position.size as f64 - 2.0 * self.commission;
        let pnl_pct = (exit_price - position.entry_price) / position.entry_price * 100.0;

        position.status = PositionStatus::Closed;
        position.exit_time = Some(t);
        position.exit_price = Some(exit_price);
        position.exit_reason = Some(reason);
        position.pnl = Some(pnl);
        position.pnl_pct = Some(pnl_pct);

        self.portfolio.cash += position.size as f64 * exit_price - self.commission;
        if self.portfolio.cash < 0.0 {
            warn!("Cash went negative after close: {:.2}", self.portfolio.cash);
        }

        self.closed.push(position.clone());
        self.portfolio.revalue(&self.active);

        info!(
            "Closed {} @ {:.2} ({}) pnl {:.2} ({:.2}%)",
            order_id,
            exit_price,
            reason.as_str(),
            pnl,
            pnl_pct
        );

        Ok(position)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.active.values().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_map(&self) -> &HashMap<String, Position> {
        &self.active
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn can_enter(&self) -> bool {
        self.active.len() < self.max_positions && self.trades_today < self.max_trades_per_day
    }

    /// Day rollover: counters reset, closed history stays with the session
    pub fn reset_day(&mut self) {
        self.trades_today = 0;
        self.order_seq = 0;
        self.order_date = None;
    }

    /// Per-day statistics for persistence and the EOD summary
    pub fn daily_stats(&self, date: NaiveDate) -> DailyStats {
        let todays: Vec<&Position> = self
            .closed
            .iter()
            .filter(|p| trading_date(p.entry_time) == date)
            .collect();
        let wins = todays.iter().filter(|p| p.pnl.unwrap_or(0.0) > 0.0).count() as u32;
        let losses = todays.iter().filter(|p| p.pnl.unwrap_or(0.0) < 0.0).count() as u32;
        DailyStats {
            trades_today: self.trades_today,
            wins,
            losses,
            gross_pnl: todays.iter().filter_map(|p| p.pnl).sum(),
            commission_paid: (todays.len() as f64 * 2.0 + self.active.len() as f64)
                * self.commission,
        }
    }

    /// Rehydrate from a persisted mid-day state. The order sequence resumes
    /// past the largest suffix already issued for `date`.
    pub fn restore(
        &mut self,
        active: HashMap<String, Position>,
        closed: Vec<Position>,
        portfolio: Portfolio,
        trades_today: u32,
        date: NaiveDate,
    ) {
        let prefix = format!("PAPER_{}_", date.format("%Y%m%d"));
        let max_seq = active
            .keys()
            .chain(closed.iter().map(|p| &p.order_id))
            .filter_map(|id| id.strip_prefix(&prefix))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .max()
            .unwrap_or(0);

        self.active = active;
        self.closed = closed;
        self.portfolio = portfolio;
        self.trades_today = trades_today;
        self.order_date = Some(date);
        self.order_seq = max_seq;
        self.portfolio.revalue(&self.active);

        info!(
            "Ledger restored: {} open, {} closed, seq {} on {}",
            self.active.len(),
            self.closed.len(),
            self.order_seq,
            date
        );
    }
}
