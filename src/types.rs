/// Core type definitions for the OI-unwinding engine
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Option type (Call or Put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &str {
        match self {
            OptionType::Call => "CALL",
            OptionType::Put => "PUT",
        }
    }

}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    InitialSl,
    VwapSl,
    OiSl,
    TrailingSl,
    Eod,
    ForcedExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExitReason::InitialSl => "INITIAL_SL",
            ExitReason::VwapSl => "VWAP_SL",
            ExitReason::OiSl => "OI_SL",
            ExitReason::TrailingSl => "TRAILING_SL",
            ExitReason::Eod => "EOD",
            ExitReason::ForcedExit => "FORCED_EXIT",
        }
    }

    /// Stop-triggered exits carry a threshold price; EOD/forced exits do not.
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            ExitReason::InitialSl | ExitReason::VwapSl | ExitReason::OiSl | ExitReason::TrailingSl
        )
    }
}

/// How stop-triggered exits are filled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Fill exactly at the configured threshold (limit semantics)
    Strict,
    /// Fill at the observed tick price less slippage (market semantics)
    Market { slippage_pct: f64 },
}

/// Run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Backtest,
    Paper,
    Live,
}

impl RunMode {
    pub fn as_str(&self) -> &str {
        match self {
            RunMode::Backtest => "backtest",
            RunMode::Paper => "paper",
            RunMode::Live => "live",
        }
    }
}

/// Expiry selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    Weekly,
    Monthly,
    Closest,
}

/// Position lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// One option contract quote at one timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub timestamp: DateTime<Utc>,
    pub strike: i32,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub oi: i64,
    pub underlying: f64,
    pub iv: f64,
    pub delta: f64,
}

impl OptionQuote {
    /// Typical price used by the VWAP accumulator
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn is_sane(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0
            && self.oi >= 0
    }
}

/// Open-to-close lifecycle of a single trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub order_id: String,
    pub symbol: String,
    pub strike: i32,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub size: i32,
    pub entry_vwap: f64,
    pub entry_oi: i64,
    pub peak_price: f64,
    pub trailing_active: bool,
    pub status: PositionStatus,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
}

/// Per-day strategy context. Direction is frozen once locked; the trading
/// strike is recomputed every tick and may drift with spot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyContext {
    pub trading_date: Option<NaiveDate>,
    pub direction: Option<OptionType>,
    pub max_call_oi_strike: Option<i32>,
    pub max_put_oi_strike: Option<i32>,
    pub call_distance: Option<f64>,
    pub put_distance: Option<f64>,
    pub trading_strike: Option<i32>,
    pub expiry: Option<NaiveDate>,
    pub daily_trade_taken: bool,
}

/// Session portfolio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub initial_capital: f64,
    pub cash: f64,
    pub positions_value: f64,
    pub total_value: f64,
    pub total_return_pct: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            initial_capital,
            cash: initial_capital,
            positions_value: 0.0,
            total_value: initial_capital,
            total_return_pct: 0.0,
        }
    }

    /// Recompute derived fields from cash and open positions
    pub fn revalue(&mut self, open_positions: &HashMap<String, Position>) {
        self.positions_value = open_positions
            .values()
            .map(|p| p.entry_price * p.size as f64)
            .sum();
        self.total_value = self.cash + self.positions_value;
        self.total_return_pct = if self.initial_capital > 0.0 {
            (self.total_value - self.initial_capital) / self.initial_capital * 100.0
        } else {
            0.0
        };
    }
}

/// Per-day trade statistics carried in the persisted state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub trades_today: u32,
    pub wins: u32,
    pub losses: u32,
    pub gross_pnl: f64,
    pub commission_paid: f64,
}

/// Heartbeat block of the persisted state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemHealth {
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub session_started: Option<DateTime<Utc>>,
}

/// Configuration for the engine (immutable after load)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Run
    pub mode: RunMode,
    pub instrument: String,

    // Expiry
    pub expiry_policy: ExpiryPolicy,
    #[serde(default)]
    pub skip_mon_tue_expiry: bool,

    // Time windows (market local time, HH:MM)
    pub timeframe_minutes: u32,
    pub entry_start: String,
    pub entry_end: String,
    pub exit_start: String,
    pub exit_end: String,
    #[serde(default)]
    pub entry_window_seconds_precision: bool,

    // Strike band
    #[serde(default = "default_strike_count")]
    pub strikes_below: usize,
    #[serde(default = "default_strike_count")]
    pub strikes_above: usize,

    // Stops
    pub initial_stop_pct: f64,
    pub vwap_stop_pct: f64,
    pub oi_increase_stop_pct: f64,
    pub trailing_stop_pct: f64,
    pub profit_threshold_ratio: f64,

    // Capital & sizing
    pub initial_capital: f64,
    pub risk_per_trade_pct: f64,
    pub lot_size: i32,
    pub max_positions: usize,
    pub max_trades_per_day: u32,

    // Execution
    pub execution_mode: String,
    #[serde(default)]
    pub slippage_pct: f64,
    #[serde(default)]
    pub commission: f64,

    // Backtest range
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    // Paths
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default)]
    pub spot_data_path: Option<String>,
    #[serde(default)]
    pub options_data_path: Option<String>,
    #[serde(default)]
    pub broker_base_url: Option<String>,

    // Live data fetch policy
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_retries")]
    pub fetch_max_retries: u32,
}

fn default_strike_count() -> usize {
    5
}

fn default_state_dir() -> String {
    "data/state".to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_fetch_retries() -> u32 {
    3
}

impl Config {
    /// Resolve the execution-mode variant from the flat config fields
    pub fn fill_mode(&self) -> ExecutionMode {
        match self.execution_mode.as_str() {
            "MARKET" => ExecutionMode::Market {
                slippage_pct: self.slippage_pct,
            },
            _ => ExecutionMode::Strict,
        }
    }

    /// Option contract display symbol, e.g. NIFTY25900PUT
    pub fn option_symbol(&self, strike: i32, option_type: OptionType) -> String {
        format!("{}{}{}", self.instrument, strike, option_type.as_str())
    }
}
