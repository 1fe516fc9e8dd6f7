/// Centralized error types for the engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradingError {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Data Errors
    #[error("No data: {0}")]
    NoData(String),

    #[error("No tradable strike: {0}")]
    NoTradableStrike(String),

    #[error("No feasible expiry: {0}")]
    NoFeasibleExpiry(String),

    #[error("Unusable snapshot: {0}")]
    UnusableSnapshot(String),

    #[error("CSV parse failed: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Network Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    // Ledger Errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position limit exceeded: {0}")]
    PositionLimitExceeded(String),

    #[error("Trade limit exceeded: {0}")]
    TradeLimitExceeded(String),

    #[error("Insufficient cash: {0}")]
    InsufficientCash(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Invariants
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // Persistence Errors
    #[error("State store error: {0}")]
    StateStoreError(String),

    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // System Errors
    #[error("System shutdown: {0}")]
    SystemShutdown(String),

    #[error("Fatal error: {0}")]
    FatalError(String),

    // Event Journal Errors
    #[error("Event dispatch failed: {0}")]
    EventDispatchFailed(String),

    #[error("Duplicate event detected: {0}")]
    DuplicateEvent(String),

    // Generic Errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, TradingError>;

impl TradingError {
    /// Errors that skip the current tick instead of aborting the run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TradingError::NoData(_)
                | TradingError::NoTradableStrike(_)
                | TradingError::NoFeasibleExpiry(_)
                | TradingError::UnusableSnapshot(_)
                | TradingError::NetworkTimeout(_)
                | TradingError::HttpError(_)
        )
    }

    /// Errors that require immediate shutdown
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TradingError::FatalError(_) | TradingError::SystemShutdown(_)
        )
    }

    /// Errors that force-close all positions and refuse new entries
    pub fn requires_halt(&self) -> bool {
        matches!(self, TradingError::InvariantViolation(_))
    }

    /// Host process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            TradingError::ConfigError(_)
            | TradingError::InvalidParameter(_)
            | TradingError::CsvError(_)
            | TradingError::FileError(_) => 1,
            TradingError::SystemShutdown(_) => 130,
            _ => 2,
        }
    }
}
