pub mod engine;

pub use engine::{ExitMarket, StrategyEngine};
