/// Append-only trade logs
///
/// Every closed trade lands in two CSVs with an identical schema: the
/// per-session log and the cumulative log that persists across sessions.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::types::Position;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub strike: i32,
    pub option_type: String,
    pub expiry: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: i32,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub vwap_at_entry: f64,
    pub vwap_at_exit: f64,
    pub oi_at_entry: i64,
    pub oi_change_at_entry: i64,
    pub oi_at_exit: i64,
    pub exit_reason: String,
}

impl TradeRecord {
    /// Build from a closed position plus the exit-time market readings
    pub fn from_closed(
        position: &Position,
        vwap_at_exit: f64,
        oi_change_at_entry: i64,
        oi_at_exit: i64,
    ) -> Option<Self> {
        Some(TradeRecord {
            entry_time: position.entry_time,
            exit_time: position.exit_time?,
            strike: position.strike,
            option_type: position.option_type.as_str().to_string(),
            expiry: position.expiry.to_string(),
            entry_price: position.entry_price,
            exit_price: position.exit_price?,
            size: position.size,
            pnl: position.pnl?,
            pnl_pct: position.pnl_pct?,
            vwap_at_entry: position.entry_vwap,
            vwap_at_exit,
            oi_at_entry: position.entry_oi,
            oi_change_at_entry,
            oi_at_exit,
            exit_reason: position.exit_reason?.as_str().to_string(),
        })
    }
}

pub struct TradeLog {
    session_path: PathBuf,
    cumulative_path: PathBuf,
}

impl TradeLog {
    pub fn new<P: AsRef<Path>>(session_path: P, cumulative_path: P) -> Self {
        TradeLog {
            session_path: session_path.as_ref().to_path_buf(),
            cumulative_path: cumulative_path.as_ref().to_path_buf(),
        }
    }

    /// Append one record to both logs
    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        append_record(&self.session_path, record)?;
        append_record(&self.cumulative_path, record)?;
        info!(
            "Trade logged: {} {} @ {:.2} -> {:.2} ({})",
            record.option_type, record.strike, record.entry_price, record.exit_price,
            record.exit_reason
        );
        Ok(())
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }
}

fn append_record(path: &Path, record: &TradeRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let write_header = !path.exists();

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    writer.serialize(record)?;
    writer.flush()?;
    Ok(())
}
