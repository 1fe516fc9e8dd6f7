/// Configuration loading from TOML file
use crate::error::{Result, TradingError};
use crate::time::session::parse_window_time;
use crate::types::{Config, RunMode};
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        TradingError::ConfigError(format!(
            "Failed to read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| TradingError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    // Time windows must parse, be ordered, and not overlap
    let entry_start = parse_window_time(&config.entry_start)?;
    let entry_end = parse_window_time(&config.entry_end)?;
    let exit_start = parse_window_time(&config.exit_start)?;
    let exit_end = parse_window_time(&config.exit_end)?;

    if entry_start >= entry_end {
        return Err(TradingError::ConfigError(format!(
            "entry window inverted: {} >= {}",
            config.entry_start, config.entry_end
        )));
    }
    if exit_start >= exit_end {
        return Err(TradingError::ConfigError(format!(
            "exit window inverted: {} >= {}",
            config.exit_start, config.exit_end
        )));
    }
    if entry_end > exit_start {
        return Err(TradingError::ConfigError(
            "entry window overlaps exit window".to_string(),
        ));
    }

    // Percentages in [0, 1]
    for (name, pct) in [
        ("initial_stop_pct", config.initial_stop_pct),
        ("vwap_stop_pct", config.vwap_stop_pct),
        ("oi_increase_stop_pct", config.oi_increase_stop_pct),
        ("trailing_stop_pct", config.trailing_stop_pct),
        ("risk_per_trade_pct", config.risk_per_trade_pct),
        ("slippage_pct", config.slippage_pct),
    ] {
        if !(0.0..=1.0).contains(&pct) {
            return Err(TradingError::ConfigError(format!(
                "{} out of [0, 1]: {}",
                name, pct
            )));
        }
    }

    if config.initial_stop_pct <= 0.0 {
        return Err(TradingError::ConfigError(
            "initial_stop_pct must be > 0".to_string(),
        ));
    }

    if config.profit_threshold_ratio < 1.0 {
        return Err(TradingError::ConfigError(format!(
            "profit_threshold_ratio must be >= 1.0: {}",
            config.profit_threshold_ratio
        )));
    }

    if config.initial_capital <= 0.0 {
        return Err(TradingError::ConfigError(
            "initial_capital must be > 0".to_string(),
        ));
    }
    if config.lot_size <= 0 {
        return Err(TradingError::ConfigError("lot_size must be > 0".to_string()));
    }
    if config.timeframe_minutes == 0 {
        return Err(TradingError::ConfigError(
            "timeframe_minutes must be > 0".to_string(),
        ));
    }
    if config.max_positions == 0 || config.max_trades_per_day == 0 {
        return Err(TradingError::ConfigError(
            "max_positions and max_trades_per_day must be > 0".to_string(),
        ));
    }

    match config.execution_mode.as_str() {
        "STRICT" => {}
        "MARKET" => {
            if config.slippage_pct <= 0.0 {
                return Err(TradingError::ConfigError(
                    "MARKET execution requires slippage_pct > 0".to_string(),
                ));
            }
        }
        other => {
            return Err(TradingError::ConfigError(format!(
                "execution_mode must be STRICT or MARKET: {}",
                other
            )));
        }
    }

    // Mode-specific data surfaces
    match config.mode {
        RunMode::Backtest => {
            if config.spot_data_path.is_none() || config.options_data_path.is_none() {
                return Err(TradingError::ConfigError(
                    "backtest mode requires spot_data_path and options_data_path".to_string(),
                ));
            }
            if config.start_date.is_none() || config.end_date.is_none() {
                return Err(TradingError::ConfigError(
                    "backtest mode requires start_date and end_date".to_string(),
                ));
            }
            if config.start_date > config.end_date {
                return Err(TradingError::ConfigError(
                    "start_date after end_date".to_string(),
                ));
            }
        }
        RunMode::Paper | RunMode::Live => {
            if config.broker_base_url.is_none() {
                return Err(TradingError::ConfigError(format!(
                    "{} mode requires broker_base_url",
                    config.mode.as_str()
                )));
            }
            if config.fetch_timeout_secs < 30 {
                return Err(TradingError::ConfigError(
                    "fetch_timeout_secs must be >= 30".to_string(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
mode = "backtest"
instrument = "NIFTY"
expiry_policy = "weekly"
skip_mon_tue_expiry = true
timeframe_minutes = 5
entry_start = "09:30"
entry_end = "14:30"
exit_start = "15:15"
exit_end = "15:25"
initial_stop_pct = 0.25
vwap_stop_pct = 0.02
oi_increase_stop_pct = 0.05
trailing_stop_pct = 0.10
profit_threshold_ratio = 1.10
initial_capital = 100000.0
risk_per_trade_pct = 0.02
lot_size = 75
max_positions = 1
max_trades_per_day = 1
execution_mode = "STRICT"
commission = 20.0
start_date = "2025-06-02"
end_date = "2025-06-06"
spot_data_path = "data/spot.csv"
options_data_path = "data/options.csv"
"#
        .to_string()
    }

    fn write_and_load(toml: &str) -> Result<Config> {
        let path = std::env::temp_dir().join(format!("oiw_cfg_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, toml).unwrap();
        let result = load_config(&path);
        let _ = std::fs::remove_file(&path);
        result
    }

    #[test]
    fn test_valid_config_loads() {
        let config = write_and_load(&base_toml()).unwrap();
        assert_eq!(config.timeframe_minutes, 5);
        assert_eq!(config.strikes_below, 5);
        assert_eq!(config.strikes_above, 5);
        assert!(config.skip_mon_tue_expiry);
    }

    #[test]
    fn test_inverted_entry_window_rejected() {
        let toml = base_toml()
            .replace("entry_start = \"09:30\"", "entry_start = \"15:00\"")
            .replace("entry_end = \"14:30\"", "entry_end = \"10:00\"");
        assert!(write_and_load(&toml).is_err());
    }

    #[test]
    fn test_overlapping_windows_rejected() {
        let toml = base_toml().replace("entry_end = \"14:30\"", "entry_end = \"15:20\"");
        assert!(write_and_load(&toml).is_err());
    }

    #[test]
    fn test_market_mode_requires_slippage() {
        let toml = base_toml().replace(
            "execution_mode = \"STRICT\"",
            "execution_mode = \"MARKET\"",
        );
        assert!(write_and_load(&toml).is_err());

        let toml = format!("{}slippage_pct = 0.001\n", toml);
        let config = write_and_load(&toml).unwrap();
        assert_eq!(
            config.fill_mode(),
            crate::types::ExecutionMode::Market {
                slippage_pct: 0.001
            }
        );
    }

    #[test]
    fn test_stop_pct_out_of_range_rejected() {
        let toml = base_toml().replace("initial_stop_pct = 0.25", "initial_stop_pct = 1.5");
        assert!(write_and_load(&toml).is_err());
    }
}
