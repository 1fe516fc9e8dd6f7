pub mod oi;
pub mod vwap;

pub use oi::{analyze, OiAnalysis};
pub use vwap::{VwapAccumulator, VwapBook};
