pub mod store;
pub mod trade_log;

pub use store::{OiPoint, PersistedState, RecoveryDecision, StateStore, StrategyState};
pub use trade_log::{TradeLog, TradeRecord};
