pub mod performance;

pub use performance::{PerformanceAnalyzer, PerformanceMetrics};
