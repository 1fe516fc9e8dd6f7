/// Main entry point for the OI-unwinding engine
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use oi_unwind::{
    broker::LiveFeed,
    config::load_config,
    data::FileFeed,
    error::TradingError,
    runner::{BacktestRunner, LiveRunner, RunOutcome},
    Config, RunMode,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oi_unwind=info")),
        )
        .init();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    let config = match load_config(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting {} session for {} ({} mode)",
        env!("CARGO_PKG_NAME"),
        config.instrument,
        config.mode.as_str()
    );

    let code = match config.mode {
        RunMode::Backtest => run_backtest(config).await,
        RunMode::Paper | RunMode::Live => run_live(config).await,
    };

    std::process::exit(code);
}

async fn run_backtest(config: Arc<Config>) -> i32 {
    let spot_path = config.spot_data_path.clone().unwrap_or_default();
    let options_path = config.options_data_path.clone().unwrap_or_default();

    let feed = match FileFeed::load(&spot_path, &options_path) {
        Ok(feed) => feed,
        Err(e) => {
            error!("Data load failed: {}", e);
            return 1;
        }
    };

    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping backtest");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut runner = match BacktestRunner::new(config, feed, shutdown) {
        Ok(runner) => runner,
        Err(e) => {
            error!("Runner setup failed: {}", e);
            return e.exit_code();
        }
    };

    match runner.run().await {
        Ok(report) => {
            info!(
                "Backtest done: {} trades, final cash {:.2} ({} bars, {} skipped)",
                report.closed.len(),
                report.final_cash,
                report.bars_processed,
                report.bars_skipped
            );
            match report.outcome {
                RunOutcome::Completed => 0,
                RunOutcome::Interrupted => 130,
            }
        }
        Err(e) => {
            error!("Backtest failed: {}", e);
            e.exit_code()
        }
    }
}

async fn run_live(config: Arc<Config>) -> i32 {
    let base_url = config.broker_base_url.clone().unwrap_or_default();
    let feed = match LiveFeed::new(
        base_url,
        config.instrument.clone(),
        config.fetch_timeout_secs,
        config.fetch_max_retries,
    ) {
        Ok(feed) => Arc::new(feed),
        Err(e) => {
            error!("Broker client setup failed: {}", e);
            return 1;
        }
    };

    let runner = LiveRunner::new(config, feed);
    match runner.run().await {
        Ok(RunOutcome::Completed) => 0,
        Ok(RunOutcome::Interrupted) => 130,
        Err(e) => {
            error!("Session failed: {} (state flushed)", e);
            let code = e.exit_code();
            if matches!(e, TradingError::SystemShutdown(_)) {
                130
            } else {
                code
            }
        }
    }
}
