/// Live quote surface over the broker's REST API
///
/// Only the data-plane endpoints the engine consumes are modelled here:
/// spot, chain, LTP and market status. Authentication and order transport
/// belong to the hosting deployment. Broker JSON (CE/PE codes, flat rows)
/// is mapped to the internal model at this boundary and nowhere else.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::data::{chain::OptionsSnapshot, MarketData};
use crate::error::Result;
use crate::time::{expiry::next_expiry_from_calendar, session, trading_date};
use crate::types::{ExpiryPolicy, OptionQuote, OptionType};

#[derive(Debug, Deserialize)]
struct SpotResponse {
    status: bool,
    data: Option<SpotData>,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    ltp: f64,
}

#[derive(Debug, Deserialize)]
struct ChainResponse {
    status: bool,
    data: Option<Vec<ChainRow>>,
}

#[derive(Debug, Deserialize)]
struct ChainRow {
    strike: f64,
    option_type: String,
    expiry: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    #[serde(rename = "OI")]
    oi: i64,
    #[serde(rename = "IV", default)]
    iv: f64,
    #[serde(default)]
    delta: f64,
}

#[derive(Debug, Deserialize)]
struct LtpResponse {
    status: bool,
    data: Option<LtpData>,
}

#[derive(Debug, Deserialize)]
struct LtpData {
    ltp: f64,
}

#[derive(Debug, Deserialize)]
struct MarketStatusResponse {
    #[allow(dead_code)]
    status: bool,
    #[serde(default)]
    open: bool,
}

/// Live market-data adapter with bounded exponential-backoff retry
pub struct LiveFeed {
    client: Client,
    base_url: String,
    instrument: String,
    max_retries: u32,
}

impl LiveFeed {
    pub fn new(base_url: String, instrument: String, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(LiveFeed {
            client,
            base_url,
            instrument,
            max_retries,
        })
    }

    /// GET with retry: delays 1s, 2s, 4s; after exhaustion the caller sees
    /// `None` so the tick is skipped rather than the run aborted.
    async fn get_with_retry<T: serde::de::DeserializeOwned>(&self, url: &str) -> Option<T> {
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                debug!("Retry {}/{} for {} after {:?}", attempt, self.max_retries, url, backoff);
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<T>().await {
                        Ok(parsed) => return Some(parsed),
                        Err(e) => {
                            warn!("Malformed response from {}: {}", url, e);
                        }
                    }
                }
                Ok(response) => {
                    warn!("HTTP {} from {}", response.status(), url);
                }
                Err(e) => {
                    warn!("Request to {} failed: {}", url, e);
                }
            }
        }

        warn!("Exhausted {} retries for {}; treating as no data", self.max_retries, url);
        None
    }

    fn parse_chain_row(&self, t: DateTime<Utc>, spot: f64, row: &ChainRow) -> Option<OptionQuote> {
        let option_type = match row.option_type.as_str() {
            "CE" => OptionType::Call,
            "PE" => OptionType::Put,
            _ => return None,
        };
        let expiry = NaiveDate::parse_from_str(&row.expiry, "%Y-%m-%d").ok()?;
        let quote = OptionQuote {
            timestamp: t,
            strike: row.strike.round() as i32,
            option_type,
            expiry,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            oi: row.oi,
            underlying: spot,
            iv: row.iv,
            delta: row.delta,
        };
        quote.is_sane().then_some(quote)
    }
}

#[async_trait]
impl MarketData for LiveFeed {
    async fn spot(&self, _t: DateTime<Utc>) -> Result<Option<f64>> {
        let url = format!("{}/quote/spot?symbol={}", self.base_url, self.instrument);
        let Some(response) = self.get_with_retry::<SpotResponse>(&url).await else {
            return Ok(None);
        };
        Ok(response.status.then_some(()).and(response.data).map(|d| d.ltp))
    }

    async fn chain(
        &self,
        t: DateTime<Utc>,
        spot: f64,
        strikes_below: usize,
        strikes_above: usize,
        expiry_policy: ExpiryPolicy,
        skip_mon_tue: bool,
    ) -> Result<Option<OptionsSnapshot>> {
        let Some(expiry) = self.resolve_expiry(t, expiry_policy, skip_mon_tue).await? else {
            return Ok(None);
        };

        let url = format!(
            "{}/quote/chain?symbol={}&expiry={}&below={}&above={}",
            self.base_url, self.instrument, expiry, strikes_below, strikes_above
        );
        let Some(response) = self.get_with_retry::<ChainResponse>(&url).await else {
            return Ok(None);
        };
        let Some(rows) = response.status.then_some(()).and(response.data) else {
            return Ok(None);
        };

        let mut snapshot = OptionsSnapshot::new(t, spot, expiry);
        for row in &rows {
            if let Some(quote) = self.parse_chain_row(t, spot, row) {
                if quote.expiry == expiry {
                    snapshot.insert(quote);
                }
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
        _t: DateTime<Utc>,
        strike: i32,
        option_type: OptionType,
        expiry: NaiveDate,
    ) -> Result<Option<f64>> {
        let code = match option_type {
            OptionType::Call => "CE",
            OptionType::Put => "PE",
        };
        let url = format!(
            "{}/quote/ltp?symbol={}&strike={}&type={}&expiry={}",
            self.base_url, self.instrument, strike, code, expiry
        );
        let Some(response) = self.get_with_retry::<LtpResponse>(&url).await else {
            return Ok(None);
        };
        Ok(response.status.then_some(()).and(response.data).map(|d| d.ltp))
    }

    async fn is_market_open(&self, t: DateTime<Utc>) -> bool {
        let url = format!("{}/market/status", self.base_url);
        match self.get_with_retry::<MarketStatusResponse>(&url).await {
            Some(response) => response.open,
            // Fall back to the session calendar when the endpoint is down
            None => session::is_market_open(t) && session::is_trading_day(t),
        }
    }

    async fn resolve_expiry(
        &self,
        t: DateTime<Utc>,
        policy: ExpiryPolicy,
        skip_mon_tue: bool,
    ) -> Result<Option<NaiveDate>> {
        Ok(Some(next_expiry_from_calendar(
            trading_date(t),
            policy,
            skip_mon_tue,
        )))
    }
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("base_url", &self.base_url)
            .field("instrument", &self.instrument)
            .finish()
    }
}
