pub mod chain;
pub mod csv_feed;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub use chain::OptionsSnapshot;
pub use csv_feed::FileFeed;

use crate::error::Result;
use crate::types::{ExpiryPolicy, OptionType};

/// Market-data surface the engine consumes. `Ok(None)` is the no-data
/// signal: the caller skips the current tick and carries on.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Underlying spot level at `t`
    async fn spot(&self, t: DateTime<Utc>) -> Result<Option<f64>>;

    /// Options chain around `spot` for the policy-resolved expiry at `t`
    async fn chain(
        &self,
        t: DateTime<Utc>,
        spot: f64,
        strikes_below: usize,
        strikes_above: usize,
        expiry_policy: ExpiryPolicy,
        skip_mon_tue: bool,
    ) -> Result<Option<OptionsSnapshot>>;

    /// Last traded price of one contract at `t`
    async fn ltp(
        &self,
        t: DateTime<Utc>,
        strike: i32,
        option_type: OptionType,
        expiry: NaiveDate,
    ) -> Result<Option<f64>>;

    async fn is_market_open(&self, t: DateTime<Utc>) -> bool;

    /// Closest feasible expiry on/after `t`'s trading date
    async fn resolve_expiry(
        &self,
        t: DateTime<Utc>,
        policy: ExpiryPolicy,
        skip_mon_tue: bool,
    ) -> Result<Option<NaiveDate>>;
}
