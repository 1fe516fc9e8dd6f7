/// Performance metrics and the end-of-session summary
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::types::{OptionType, Position};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,

    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    // Execution
    pub avg_hold_time_minutes: f64,

    // Per-side breakdown
    pub call_trades: usize,
    pub put_trades: usize,
    pub call_win_rate: f64,
    pub put_win_rate: f64,
}

pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    /// Metrics over a set of closed positions
    pub fn calculate_metrics(date: NaiveDate, positions: &[Position]) -> PerformanceMetrics {
        let closed: Vec<&Position> = positions.iter().filter(|p| p.pnl.is_some()).collect();
        let total_trades = closed.len();

        let pnls: Vec<f64> = closed.iter().filter_map(|p| p.pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|x| *x > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|x| *x < 0.0).collect();

        let win_rate = if total_trades > 0 {
            wins.len() as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|x| x.abs()).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            gross_profit / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            -gross_loss / losses.len() as f64
        };

        let (max_drawdown, max_drawdown_pct) = Self::max_drawdown(&pnls);

        let hold_times: Vec<f64> = closed
            .iter()
            .filter_map(|p| {
                p.exit_time
                    .map(|exit| (exit - p.entry_time).num_seconds() as f64 / 60.0)
            })
            .collect();
        let avg_hold_time_minutes = if hold_times.is_empty() {
            0.0
        } else {
            hold_times.iter().sum::<f64>() / hold_times.len() as f64
        };

        let side = |ty: OptionType| -> (usize, f64) {
            let of_side: Vec<&&Position> =
                closed.iter().filter(|p| p.option_type == ty).collect();
            let side_wins = of_side
                .iter()
                .filter(|p| p.pnl.unwrap_or(0.0) > 0.0)
                .count();
            let rate = if of_side.is_empty() {
                0.0
            } else {
                side_wins as f64 / of_side.len() as f64 * 100.0
            };
            (of_side.len(), rate)
        };
        let (call_trades, call_win_rate) = side(OptionType::Call);
        let (put_trades, put_win_rate) = side(OptionType::Put);

        PerformanceMetrics {
            date,
            generated_at: Utc::now(),
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            total_pnl: pnls.iter().sum(),
            gross_profit,
            gross_loss,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            max_drawdown,
            max_drawdown_pct,
            avg_hold_time_minutes,
            call_trades,
            put_trades,
            call_win_rate,
            put_win_rate,
        }
    }

    fn max_drawdown(pnls: &[f64]) -> (f64, f64) {
        let mut cumulative = 0.0;
        let mut peak = 0.0;
        let mut max_dd = 0.0;

        for pnl in pnls {
            cumulative += pnl;
            if cumulative > peak {
                peak = cumulative;
            }
            let drawdown = peak - cumulative;
            if drawdown > max_dd {
                max_dd = drawdown;
            }
        }

        let pct = if peak > 0.0 { max_dd / peak * 100.0 } else { 0.0 };
        (max_dd, pct)
    }

    /// Write the day's report JSON and append the summary CSV row
    pub fn save_report(report_dir: &str, metrics: &PerformanceMetrics) -> Result<()> {
        std::fs::create_dir_all(report_dir)?;

        let filename = format!("{}/performance_{}.json", report_dir, metrics.date);
        let json = serde_json::to_string_pretty(metrics)?;
        std::fs::write(&filename, json)?;
        info!("Saved performance report to {}", filename);

        Self::append_to_summary_csv(report_dir, metrics)?;
        Ok(())
    }

    fn append_to_summary_csv(report_dir: &str, m: &PerformanceMetrics) -> Result<()> {
        let csv_file = format!("{}/summary.csv", report_dir);

        if !Path::new(&csv_file).exists() {
            let header = "date,total_trades,win_rate,profit_factor,total_pnl,max_drawdown_pct,avg_win,avg_loss,call_trades,put_trades\n";
            std::fs::write(&csv_file, header)?;
        }

        let row = format!(
            "{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{},{}\n",
            m.date,
            m.total_trades,
            m.win_rate,
            m.profit_factor,
            m.total_pnl,
            m.max_drawdown_pct,
            m.avg_win,
            m.avg_loss,
            m.call_trades,
            m.put_trades
        );

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&csv_file)?;
        file.write_all(row.as_bytes())?;
        Ok(())
    }

    /// Human-readable summary through the log sink
    pub fn print_summary(metrics: &PerformanceMetrics) {
        info!("=== SESSION SUMMARY {} ===", metrics.date);
        info!(
            "Trades: {} (won {}, lost {}, win rate {:.1}%)",
            metrics.total_trades, metrics.winning_trades, metrics.losing_trades, metrics.win_rate
        );
        info!(
            "PnL: {:.2} (gross +{:.2} / -{:.2}, profit factor {:.2})",
            metrics.total_pnl, metrics.gross_profit, metrics.gross_loss, metrics.profit_factor
        );
        info!(
            "Best {:.2} / worst {:.2}, max drawdown {:.2} ({:.2}%)",
            metrics.largest_win, metrics.largest_loss, metrics.max_drawdown, metrics.max_drawdown_pct
        );
        info!(
            "Avg hold {:.1} min; CALL {} ({:.1}%), PUT {} ({:.1}%)",
            metrics.avg_hold_time_minutes,
            metrics.call_trades,
            metrics.call_win_rate,
            metrics.put_trades,
            metrics.put_win_rate
        );
    }
}
