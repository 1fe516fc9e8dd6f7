/// File-backed market data for backtests
///
/// Two CSVs feed the engine: a spot series (`date,open,high,low,close,volume`)
/// and an options series keyed by timestamp/strike/expiry/type. Timestamps in
/// both files are market local time (IST); the broker's CE/PE codes are mapped
/// to the internal Call/Put variants here and nowhere else.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Asia::Kolkata;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::chain::OptionsSnapshot;
use super::MarketData;
use crate::error::{Result, TradingError};
use crate::time::{expiry::resolve_expiry, session, trading_date};
use crate::types::{ExpiryPolicy, OptionQuote, OptionType};

#[derive(Debug, Clone, Copy)]
pub struct SpotBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Deserialize)]
struct SpotRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
}

#[derive(Debug, Deserialize)]
struct OptionRow {
    timestamp: String,
    strike: f64,
    expiry: String,
    option_type: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    underlying_price: f64,
    #[allow(dead_code)]
    futures_price: f64,
    #[serde(rename = "IV")]
    iv: f64,
    #[allow(dead_code)]
    time_to_expiry: f64,
    delta: f64,
    #[serde(rename = "OI")]
    oi: i64,
}

type ContractKey = (i32, OptionType, NaiveDate);

pub struct FileFeed {
    spot_bars: BTreeMap<DateTime<Utc>, SpotBar>,
    options: HashMap<DateTime<Utc>, HashMap<ContractKey, OptionQuote>>,
    expiries: BTreeSet<NaiveDate>,
}

impl FileFeed {
    pub fn load<P: AsRef<Path>>(spot_path: P, options_path: P) -> Result<Self> {
        let spot_bars = load_spot_csv(spot_path.as_ref())?;
        let (options, expiries) = load_options_csv(options_path.as_ref())?;

        if spot_bars.is_empty() {
            return Err(TradingError::ConfigError(format!(
                "no spot bars loaded from {}",
                spot_path.as_ref().display()
            )));
        }
        if options.is_empty() {
            return Err(TradingError::ConfigError(format!(
                "no option rows loaded from {}",
                options_path.as_ref().display()
            )));
        }

        info!(
            "Loaded {} spot bars, {} option timestamps, {} expiries",
            spot_bars.len(),
            options.len(),
            expiries.len()
        );

        Ok(FileFeed {
            spot_bars,
            options,
            expiries,
        })
    }

    /// Build a feed from already-parsed rows (tests, synthetic data)
    pub fn from_parts(
        spot_bars: BTreeMap<DateTime<Utc>, SpotBar>,
        quotes: Vec<OptionQuote>,
    ) -> Self {
        let mut options: HashMap<DateTime<Utc>, HashMap<ContractKey, OptionQuote>> = HashMap::new();
        let mut expiries = BTreeSet::new();
        for q in quotes {
            let t = truncate_minute(q.timestamp);
            expiries.insert(q.expiry);
            options
                .entry(t)
                .or_default()
                .insert((q.strike, q.option_type, q.expiry), q);
        }
        FileFeed {
            spot_bars,
            options,
            expiries,
        }
    }

    /// Bar timestamps between two trading dates inclusive, for the sim clock
    pub fn bar_timestamps(&self, start: NaiveDate, end: NaiveDate) -> Vec<DateTime<Utc>> {
        self.spot_bars
            .keys()
            .copied()
            .filter(|t| {
                let d = trading_date(*t);
                d >= start && d <= end
            })
            .collect()
    }

    fn quotes_at(&self, t: DateTime<Utc>) -> Option<&HashMap<ContractKey, OptionQuote>> {
        self.options.get(&truncate_minute(t))
    }
}

#[async_trait]
impl MarketData for FileFeed {
    async fn spot(&self, t: DateTime<Utc>) -> Result<Option<f64>> {
        Ok(self
            .spot_bars
            .get(&truncate_minute(t))
            .map(|bar| bar.close))
    }

    async fn chain(
        &self,
        t: DateTime<Utc>,
        spot: f64,
        _strikes_below: usize,
        _strikes_above: usize,
        expiry_policy: ExpiryPolicy,
        skip_mon_tue: bool,
    ) -> Result<Option<OptionsSnapshot>> {
        let Some(expiry) = self.resolve_expiry(t, expiry_policy, skip_mon_tue).await? else {
            return Ok(None);
        };
        let Some(quotes) = self.quotes_at(t) else {
            return Ok(None);
        };

        let mut snapshot = OptionsSnapshot::new(truncate_minute(t), spot, expiry);
        for ((_, _, quote_expiry), quote) in quotes {
            if *quote_expiry == expiry {
                snapshot.insert(quote.clone());
            }
        }

        if snapshot.is_empty() {
            Ok(None)
        } else {
            Ok(Some(snapshot))
        }
    }

    async fn ltp(
        &self,
        t: DateTime<Utc>,
        strike: i32,
        option_type: OptionType,
        expiry: NaiveDate,
    ) -> Result<Option<f64>> {
        Ok(self
            .quotes_at(t)
            .and_then(|quotes| quotes.get(&(strike, option_type, expiry)))
            .map(|q| q.close))
    }

    async fn is_market_open(&self, t: DateTime<Utc>) -> bool {
        session::is_market_open(t)
    }

    async fn resolve_expiry(
        &self,
        t: DateTime<Utc>,
        policy: ExpiryPolicy,
        skip_mon_tue: bool,
    ) -> Result<Option<NaiveDate>> {
        let available: Vec<NaiveDate> = self.expiries.iter().copied().collect();
        Ok(resolve_expiry(
            trading_date(t),
            policy,
            skip_mon_tue,
            &available,
        ))
    }
}

/// Truncate to minute precision; bar keys and lookups share this grid
pub fn truncate_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0).unwrap().with_nanosecond(0).unwrap()
}

/// Parse a market-local timestamp into UTC
fn parse_market_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%d-%m-%Y %H:%M"))
        .map_err(|_| TradingError::InvalidParameter(format!("bad timestamp: {}", s)))?;
    Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| TradingError::InvalidParameter(format!("ambiguous timestamp: {}", s)))
}

fn parse_expiry(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d-%m-%Y"))
        .map_err(|_| TradingError::InvalidParameter(format!("bad expiry date: {}", s)))
}

fn load_spot_csv(path: &Path) -> Result<BTreeMap<DateTime<Utc>, SpotBar>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bars = BTreeMap::new();
    for row in reader.deserialize::<SpotRow>() {
        let row = row?;
        let t = truncate_minute(parse_market_timestamp(&row.date)?);
        if row.low > row.open || row.low > row.close || row.open > row.high || row.close > row.high
        {
            warn!("Dropping malformed spot bar at {}", row.date);
            continue;
        }
        bars.insert(
            t,
            SpotBar {
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            },
        );
    }
    Ok(bars)
}

type LoadedOptions = (
    HashMap<DateTime<Utc>, HashMap<ContractKey, OptionQuote>>,
    BTreeSet<NaiveDate>,
);

fn load_options_csv(path: &Path) -> Result<LoadedOptions> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut options: HashMap<DateTime<Utc>, HashMap<ContractKey, OptionQuote>> = HashMap::new();
    let mut expiries = BTreeSet::new();
    let mut dropped = 0usize;

    for row in reader.deserialize::<OptionRow>() {
        let row = row?;
        let option_type = match row.option_type.as_str() {
            "CE" => OptionType::Call,
            "PE" => OptionType::Put,
            other => {
                warn!("Unknown option_type code {:?}, dropping row", other);
                dropped += 1;
                continue;
            }
        };
        let t = truncate_minute(parse_market_timestamp(&row.timestamp)?);
        let expiry = parse_expiry(&row.expiry)?;
        let strike = row.strike.round() as i32;

        let quote = OptionQuote {
            timestamp: t,
            strike,
            option_type,
            expiry,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            oi: row.oi,
            underlying: row.underlying_price,
            iv: row.iv,
            delta: row.delta,
        };
        if !quote.is_sane() {
            dropped += 1;
            continue;
        }

        expiries.insert(expiry);
        options
            .entry(t)
            .or_default()
            .insert((strike, option_type, expiry), quote);
    }

    if dropped > 0 {
        warn!("Dropped {} malformed option rows", dropped);
    }

    Ok((options, expiries))
}
