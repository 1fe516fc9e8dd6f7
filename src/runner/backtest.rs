/// Single-threaded bar-driven backtest over the file feed
///
/// The strategy tick alone evaluates exits on each bar close; there is no
/// separate exit monitor in backtest, and the fill policy models intra-bar
/// stop crossings.
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{persist, publish_events, record_trades, RunOutcome};
use crate::analytics::PerformanceAnalyzer;
use crate::data::{FileFeed, MarketData};
use crate::error::{Result, TradingError};
use crate::events::{Event, EventBus, EventPayload, EventType};
use crate::positions::Ledger;
use crate::state::{StateStore, TradeLog};
use crate::strategy::StrategyEngine;
use crate::time::{trading_date, Clock, SimClock};
use crate::types::{Config, Position};

pub struct BacktestReport {
    pub outcome: RunOutcome,
    pub closed: Vec<Position>,
    pub initial_capital: f64,
    pub final_cash: f64,
    pub bars_processed: usize,
    pub bars_skipped: usize,
}

pub struct BacktestRunner {
    config: Arc<Config>,
    feed: FileFeed,
    store: StateStore,
    trade_log: TradeLog,
    bus: Arc<EventBus>,
    shutdown: watch::Receiver<bool>,
}

impl BacktestRunner {
    pub fn new(config: Arc<Config>, feed: FileFeed, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let store = StateStore::new(&config.state_dir)?;
        let session_tag = Utc::now().format("%Y%m%d_%H%M%S");
        let trade_log = TradeLog::new(
            format!("{}/trades_session_{}.csv", config.state_dir, session_tag),
            format!("{}/trades_cumulative.csv", config.state_dir),
        );
        let bus = Arc::new(EventBus::new(format!("{}/events.jsonl", config.state_dir)));

        Ok(BacktestRunner {
            config,
            feed,
            store,
            trade_log,
            bus,
            shutdown,
        })
    }

    pub async fn run(&mut self) -> Result<BacktestReport> {
        let start = self
            .config
            .start_date
            .ok_or_else(|| TradingError::ConfigError("missing start_date".into()))?;
        let end = self
            .config
            .end_date
            .ok_or_else(|| TradingError::ConfigError("missing end_date".into()))?;

        let timestamps = self.feed.bar_timestamps(start, end);
        if timestamps.is_empty() {
            return Err(TradingError::NoData(format!(
                "no bars between {} and {}",
                start, end
            )));
        }

        self.bus.start_processing().await;

        let session_id = uuid::Uuid::new_v4().to_string();
        let session_started = timestamps[0];

        // Carry-over must read the prior day BEFORE today's file exists
        let capital = self
            .store
            .carry_over_capital(start, self.config.initial_capital)?;

        let mut engine = StrategyEngine::new(Arc::clone(&self.config))?;
        let mut ledger = Ledger::new(&self.config, capital);

        self.bus
            .publish(Event::at(
                EventType::SessionStarted,
                session_started,
                EventPayload::SessionStarted {
                    session_id: session_id.clone(),
                    mode: self.config.mode.as_str().to_string(),
                    initial_capital: capital,
                },
            ))
            .await
            .ok();

        info!(
            "Backtest {} -> {} over {} bars, capital {:.2}",
            start,
            end,
            timestamps.len(),
            capital
        );

        let clock = SimClock::new(timestamps);
        let mut t = clock.now();
        let mut outcome = RunOutcome::Completed;
        let mut bars_processed = 0usize;
        let mut bars_skipped = 0usize;

        loop {
            if *self.shutdown.borrow() {
                warn!("Backtest interrupted at {}", t);
                outcome = RunOutcome::Interrupted;
                break;
            }

            match self
                .process_bar(t, &session_id, session_started, &mut engine, &mut ledger)
                .await?
            {
                true => bars_processed += 1,
                false => bars_skipped += 1,
            }

            match clock.advance() {
                Some(next) => t = next,
                None => break,
            }
        }

        // Anything still open at the end of data goes out at last known LTP
        let closed_before = ledger.closed_positions().len();
        let forced = engine.close_all_forced(t, &mut ledger);
        if forced > 0 {
            warn!("Closed {} positions at end of data", forced);
            let new_closed: Vec<Position> = ledger.closed_positions()[closed_before..].to_vec();
            record_trades(&self.trade_log, &engine, &new_closed, &Default::default());
        }
        publish_events(&self.bus, &mut engine).await;
        persist(
            &self.store,
            &self.config,
            &session_id,
            trading_date(t),
            session_started,
            t,
            &engine,
            &ledger,
        );

        let closed = ledger.closed_positions().to_vec();
        let metrics = PerformanceAnalyzer::calculate_metrics(end, &closed);
        PerformanceAnalyzer::print_summary(&metrics);
        if let Err(e) = PerformanceAnalyzer::save_report(
            &format!("{}/performance", self.config.state_dir),
            &metrics,
        ) {
            warn!("Report save failed: {}", e);
        }

        self.bus
            .publish(Event::at(
                EventType::ShutdownCompleted,
                t,
                EventPayload::ShutdownCompleted { duration_sec: 0 },
            ))
            .await
            .ok();

        Ok(BacktestReport {
            outcome,
            initial_capital: capital,
            final_cash: ledger.portfolio.cash,
            closed,
            bars_processed,
            bars_skipped,
        })
    }

    /// One bar through the engine; false means the tick was skipped
    async fn process_bar(
        &mut self,
        t: DateTime<Utc>,
        session_id: &str,
        session_started: DateTime<Utc>,
        engine: &mut StrategyEngine,
        ledger: &mut Ledger,
    ) -> Result<bool> {
        let heartbeat = |engine: &StrategyEngine, ledger: &Ledger| {
            persist(
                &self.store,
                &self.config,
                session_id,
                trading_date(t),
                session_started,
                t,
                engine,
                ledger,
            );
        };

        let Some(spot) = self.feed.spot(t).await? else {
            heartbeat(engine, ledger);
            return Ok(false);
        };
        let Some(snapshot) = self
            .feed
            .chain(
                t,
                spot,
                self.config.strikes_below,
                self.config.strikes_above,
                self.config.expiry_policy,
                self.config.skip_mon_tue_expiry,
            )
            .await?
        else {
            heartbeat(engine, ledger);
            return Ok(false);
        };

        let closed_before = ledger.closed_positions().len();
        let market = engine.market_from_snapshot(&snapshot, ledger);

        engine.strategy_tick(t, spot, &snapshot, ledger)?;

        let new_closed: Vec<Position> = ledger.closed_positions()[closed_before..].to_vec();
        record_trades(&self.trade_log, engine, &new_closed, &market);
        publish_events(&self.bus, engine).await;
        heartbeat(engine, ledger);

        Ok(true)
    }
}
