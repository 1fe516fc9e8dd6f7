/// Paper/live session: the dual-loop scheduler
///
/// One strategy loop on the configured timeframe and one exit monitor on a
/// 1-minute cadence share the engine and ledger behind a single mutex. The
/// exit monitor always fetches its own LTP and chain; it never reads the
/// strategy loop's snapshot, so prices can never freeze between strategy
/// bars. SIGINT is cooperative: flush state, write the summary, exit.
use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use super::{persist, publish_events, record_trades, RunOutcome};
use crate::analytics::PerformanceAnalyzer;
use crate::data::MarketData;
use crate::error::Result;
use crate::events::{Event, EventBus, EventPayload, EventType};
use crate::positions::Ledger;
use crate::state::{PersistedState, RecoveryDecision, StateStore, TradeLog};
use crate::strategy::{ExitMarket, StrategyEngine};
use crate::time::{session, trading_date, Clock, WallClock};
use crate::types::Config;

struct Shared {
    engine: StrategyEngine,
    ledger: Ledger,
}

struct LiveCtx {
    config: Arc<Config>,
    feed: Arc<dyn MarketData>,
    store: StateStore,
    trade_log: TradeLog,
    bus: Arc<EventBus>,
    shared: Mutex<Shared>,
    clock: WallClock,
    shutdown: watch::Receiver<bool>,
    session_id: String,
    session_started: DateTime<Utc>,
    date: NaiveDate,
}

impl LiveCtx {
    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn persist_now(&self, shared: &Shared, at: DateTime<Utc>) {
        persist(
            &self.store,
            &self.config,
            &self.session_id,
            self.date,
            self.session_started,
            at,
            &shared.engine,
            &shared.ledger,
        );
    }
}

pub struct LiveRunner {
    config: Arc<Config>,
    feed: Arc<dyn MarketData>,
    shutdown_tx: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

impl LiveRunner {
    pub fn new(config: Arc<Config>, feed: Arc<dyn MarketData>) -> Self {
        let (shutdown_tx, shutdown) = watch::channel(false);
        LiveRunner {
            config,
            feed,
            shutdown_tx,
            shutdown,
        }
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let now = Utc::now();
        let date = trading_date(now);
        let session_id = uuid::Uuid::new_v4().to_string();

        if !session::is_trading_day(now) {
            warn!("{} is not a trading day, nothing to do", date);
            return Ok(RunOutcome::Completed);
        }

        let store = StateStore::new(&self.config.state_dir)?;
        let trade_log = TradeLog::new(
            format!("{}/trades_session_{}.csv", self.config.state_dir, &session_id[..8]),
            format!("{}/trades_cumulative.csv", self.config.state_dir),
        );
        let bus = Arc::new(EventBus::new(format!(
            "{}/events.jsonl",
            self.config.state_dir
        )));
        bus.start_processing().await;

        // Recovery decision comes first; carry-over must also be read
        // before today's file gets created
        let decision = store.decide_recovery(date)?;
        let mut engine = StrategyEngine::new(Arc::clone(&self.config))?;
        let capital;

        match decision {
            RecoveryDecision::Forced(state) => {
                capital = state.portfolio.initial_capital;
                let mut ledger = Ledger::new(&self.config, capital);
                restore_session(&mut engine, &mut ledger, &state);
                info!(
                    "Forced recovery: resuming {} with {} open positions",
                    date,
                    ledger.open_count()
                );
                bus.publish(Event::new(
                    EventType::RecoveryResumed,
                    EventPayload::RecoveryResumed {
                        date,
                        open_positions: ledger.open_count(),
                        forced: true,
                    },
                ))
                .await
                .ok();
                return self
                    .run_session(engine, ledger, store, trade_log, bus, session_id, date)
                    .await;
            }
            RecoveryDecision::Prompt(state) => {
                if prompt_operator(date, &state) {
                    capital = state.portfolio.initial_capital;
                    let mut ledger = Ledger::new(&self.config, capital);
                    restore_session(&mut engine, &mut ledger, &state);
                    info!("Operator accepted recovery for {}", date);
                    bus.publish(Event::new(
                        EventType::RecoveryResumed,
                        EventPayload::RecoveryResumed {
                            date,
                            open_positions: 0,
                            forced: false,
                        },
                    ))
                    .await
                    .ok();
                    return self
                        .run_session(engine, ledger, store, trade_log, bus, session_id, date)
                        .await;
                }
                info!("Operator declined recovery, starting fresh with carry-over");
                bus.publish(Event::new(
                    EventType::RecoveryDeclined,
                    EventPayload::RecoveryDeclined { date },
                ))
                .await
                .ok();
                capital = store.carry_over_capital(date, self.config.initial_capital)?;
            }
            RecoveryDecision::Fresh => {
                capital = store.carry_over_capital(date, self.config.initial_capital)?;
            }
        }

        let ledger = Ledger::new(&self.config, capital);
        self.run_session(engine, ledger, store, trade_log, bus, session_id, date)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        &self,
        engine: StrategyEngine,
        ledger: Ledger,
        store: StateStore,
        trade_log: TradeLog,
        bus: Arc<EventBus>,
        session_id: String,
        date: NaiveDate,
    ) -> Result<RunOutcome> {
        let session_started = Utc::now();
        let capital = ledger.portfolio.initial_capital;

        bus.publish(Event::new(
            EventType::SessionStarted,
            EventPayload::SessionStarted {
                session_id: session_id.clone(),
                mode: self.config.mode.as_str().to_string(),
                initial_capital: capital,
            },
        ))
        .await
        .ok();

        let ctx = Arc::new(LiveCtx {
            config: Arc::clone(&self.config),
            feed: Arc::clone(&self.feed),
            store,
            trade_log,
            bus: Arc::clone(&bus),
            shared: Mutex::new(Shared { engine, ledger }),
            clock: WallClock::new(self.shutdown.clone()),
            shutdown: self.shutdown.clone(),
            session_id,
            session_started,
            date,
        });

        // Today's file exists from here on; prior-day carry-over has
        // already been read
        {
            let shared = ctx.shared.lock().await;
            ctx.persist_now(&shared, session_started).await;
        }

        // SIGINT -> cooperative shutdown
        let shutdown_tx = self.shutdown_tx.clone();
        let sig_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, requesting shutdown");
                sig_bus
                    .publish(Event::new(
                        EventType::ShutdownInitiated,
                        EventPayload::ShutdownInitiated {
                            reason: "operator interrupt".to_string(),
                        },
                    ))
                    .await
                    .ok();
                let _ = shutdown_tx.send(true);
            }
        });

        info!(
            "Session started ({}), capital {:.2}, timeframe {}m",
            self.config.mode.as_str(),
            capital,
            self.config.timeframe_minutes
        );

        let strategy_ctx = Arc::clone(&ctx);
        let exit_ctx = Arc::clone(&ctx);
        let strategy_task = tokio::spawn(strategy_loop(strategy_ctx));
        let exit_task = tokio::spawn(exit_loop(exit_ctx));

        let (strategy_result, exit_result) = tokio::join!(strategy_task, exit_task);
        strategy_result.ok();
        exit_result.ok();

        self.finish(&ctx).await
    }

    /// Final sequence: force-close leftovers, flush state, write summary
    async fn finish(&self, ctx: &Arc<LiveCtx>) -> Result<RunOutcome> {
        let interrupted = *self.shutdown.borrow();
        let now = Utc::now();

        let mut shared = ctx.shared.lock().await;
        let leftover = shared.ledger.open_count();
        if leftover > 0 {
            warn!("Force-closing {} positions at shutdown", leftover);
            let Shared { engine, ledger } = &mut *shared;
            let closed_before = ledger.closed_positions().len();
            engine.close_all_forced(now, ledger);
            let new_closed = ledger.closed_positions()[closed_before..].to_vec();
            record_trades(&ctx.trade_log, engine, &new_closed, &Default::default());
        }
        publish_events(&ctx.bus, &mut shared.engine).await;
        ctx.persist_now(&shared, now).await;

        let metrics =
            PerformanceAnalyzer::calculate_metrics(ctx.date, shared.ledger.closed_positions());
        PerformanceAnalyzer::print_summary(&metrics);
        if let Err(e) = PerformanceAnalyzer::save_report(
            &format!("{}/performance", ctx.config.state_dir),
            &metrics,
        ) {
            warn!("Report save failed: {}", e);
        }

        let duration = (Utc::now() - ctx.session_started).num_seconds().max(0) as u64;
        ctx.bus
            .publish(Event::new(
                EventType::ShutdownCompleted,
                EventPayload::ShutdownCompleted {
                    duration_sec: duration,
                },
            ))
            .await
            .ok();

        if interrupted {
            Ok(RunOutcome::Interrupted)
        } else {
            Ok(RunOutcome::Completed)
        }
    }
}

/// Strategy loop: one tick per timeframe boundary
async fn strategy_loop(ctx: Arc<LiveCtx>) {
    loop {
        if ctx.is_shutdown() {
            break;
        }
        let now = ctx.clock.now();
        {
            let shared = ctx.shared.lock().await;
            if shared.engine.past_exit_end(now) {
                info!("Strategy loop: past exit window, stopping");
                break;
            }
        }

        if !ctx.feed.is_market_open(now).await {
            ctx.clock
                .sleep_until(now + chrono::Duration::seconds(60))
                .await;
            continue;
        }

        let next = next_bar_boundary(now, ctx.config.timeframe_minutes);
        ctx.clock.sleep_until(next).await;
        if ctx.is_shutdown() {
            break;
        }

        let t = ctx.clock.now();
        strategy_tick_once(&ctx, t).await;
    }
}

/// One strategy tick: fetch fresh data, run the engine, persist
async fn strategy_tick_once(ctx: &Arc<LiveCtx>, t: DateTime<Utc>) {
    let spot = match ctx.feed.spot(t).await {
        Ok(Some(spot)) => spot,
        Ok(None) | Err(_) => {
            warn!("No spot at {}, skipping strategy tick", t);
            let mut shared = ctx.shared.lock().await;
            skip_tick(ctx, &mut shared, t, "no spot data").await;
            return;
        }
    };

    let snapshot = match ctx
        .feed
        .chain(
            t,
            spot,
            ctx.config.strikes_below,
            ctx.config.strikes_above,
            ctx.config.expiry_policy,
            ctx.config.skip_mon_tue_expiry,
        )
        .await
    {
        Ok(Some(snap)) => snap,
        Ok(None) | Err(_) => {
            warn!("No chain at {}, skipping strategy tick", t);
            let mut shared = ctx.shared.lock().await;
            skip_tick(ctx, &mut shared, t, "no chain data").await;
            return;
        }
    };

    // Data fetched; re-take the lock and mutate under it
    let mut shared = ctx.shared.lock().await;
    let Shared { engine, ledger } = &mut *shared;

    let closed_before = ledger.closed_positions().len();
    let market = engine.market_from_snapshot(&snapshot, ledger);

    if let Err(e) = engine.strategy_tick(t, spot, &snapshot, ledger) {
        warn!("Strategy tick failed: {}", e);
    }

    let new_closed = ledger.closed_positions()[closed_before..].to_vec();
    record_trades(&ctx.trade_log, engine, &new_closed, &market);
    publish_events(&ctx.bus, engine).await;
    ctx.persist_now(&shared, t).await;
}

/// Exit monitor: every minute, fetch fresh LTP and chain for each open
/// position and run the exit ladder. Never reads cached strategy data.
async fn exit_loop(ctx: Arc<LiveCtx>) {
    loop {
        if ctx.is_shutdown() {
            break;
        }
        let now = ctx.clock.now();
        {
            let shared = ctx.shared.lock().await;
            if shared.engine.past_exit_end(now) {
                info!("Exit monitor: past exit window, stopping");
                break;
            }
        }

        let next = next_bar_boundary(now, 1);
        ctx.clock.sleep_until(next).await;
        if ctx.is_shutdown() {
            break;
        }
        let t = ctx.clock.now();

        // Snapshot the open contracts, then fetch without holding the lock
        let open = {
            let shared = ctx.shared.lock().await;
            shared.ledger.open_positions()
        };
        if open.is_empty() {
            continue;
        }

        let mut market: HashMap<String, ExitMarket> = HashMap::new();
        let spot = ctx.feed.spot(t).await.ok().flatten();
        let chain = match spot {
            Some(spot) => ctx
                .feed
                .chain(
                    t,
                    spot,
                    ctx.config.strikes_below,
                    ctx.config.strikes_above,
                    ctx.config.expiry_policy,
                    ctx.config.skip_mon_tue_expiry,
                )
                .await
                .ok()
                .flatten(),
            None => None,
        };

        for position in &open {
            let ltp = ctx
                .feed
                .ltp(t, position.strike, position.option_type, position.expiry)
                .await
                .ok()
                .flatten();
            let Some(ltp) = ltp else { continue };
            let current_oi = chain
                .as_ref()
                .and_then(|c| c.get(position.strike, position.option_type))
                .map(|q| q.oi);
            market.insert(position.order_id.clone(), ExitMarket { ltp, current_oi });
        }

        // Re-check under the lock: the strategy loop may have closed
        // positions while we were fetching
        let mut shared = ctx.shared.lock().await;
        let Shared { engine, ledger } = &mut *shared;
        market.retain(|order_id, _| ledger.active_map().contains_key(order_id));
        if market.is_empty() {
            ctx.persist_now(&shared, t).await;
            continue;
        }

        match engine.evaluate_exits(t, &market, ledger) {
            Ok(closed) if !closed.is_empty() => {
                record_trades(&ctx.trade_log, engine, &closed, &market);
            }
            Ok(_) => {}
            Err(e) => warn!("Exit evaluation failed: {}", e),
        }
        publish_events(&ctx.bus, engine).await;
        ctx.persist_now(&shared, t).await;
    }
}

/// Heartbeat persistence for a skipped tick
async fn skip_tick(ctx: &Arc<LiveCtx>, shared: &mut Shared, t: DateTime<Utc>, reason: &str) {
    shared.engine.take_events();
    ctx.bus
        .publish(Event::at(
            EventType::TickSkipped,
            t,
            EventPayload::TickSkipped {
                at: t,
                reason: reason.to_string(),
            },
        ))
        .await
        .ok();
    ctx.persist_now(shared, t).await;
}

/// Rehydrate engine and ledger from a persisted state
pub fn restore_session(engine: &mut StrategyEngine, ledger: &mut Ledger, state: &PersistedState) {
    engine.restore_state(state.strategy_state.clone());
    ledger.restore(
        state.active_positions.clone(),
        state.closed_positions.clone(),
        state.portfolio.clone(),
        state.daily_stats.trades_today,
        state.date,
    );
}

/// Next IST wall-clock boundary that is a whole multiple of `minutes`
fn next_bar_boundary(now: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
    let minutes = minutes.max(1) as i64;
    let local = now.with_timezone(&chrono_tz::Asia::Kolkata);
    let since_midnight = (local.hour() * 60 + local.minute()) as i64;
    let next = (since_midnight / minutes + 1) * minutes;

    let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap();
    let naive = midnight + chrono::Duration::minutes(next);
    chrono_tz::Asia::Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now + chrono::Duration::minutes(minutes))
}

/// Ask the operator whether to resume a partially-traded day. Anything but
/// an explicit yes starts fresh. Open positions never reach this prompt.
fn prompt_operator(date: NaiveDate, state: &PersistedState) -> bool {
    println!(
        "Found state for {} with {} closed trades (trades_today={}). Resume? [y/N] ",
        date,
        state.closed_positions.len(),
        state.daily_stats.trades_today
    );
    let mut reply = String::new();
    if std::io::stdin().read_line(&mut reply).is_err() {
        return false;
    }
    parse_operator_reply(&reply)
}

fn parse_operator_reply(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "y" | "yes")
}
