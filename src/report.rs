use crate::models::TradeRecord;
use crate::optimizer::RankedResult;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// Writes the realized trade ledger of a run as CSV, one row per closed
/// position in close order.
pub fn export_trades_csv(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record([
        "position_id",
        "entry_time",
        "entry_price",
        "exit_time",
        "exit_price",
        "quantity",
        "reason",
        "pnl",
        "pnl_pct",
        "fees",
    ])?;
    for trade in trades {
        writer.write_record([
            trade.position_id.to_string(),
            trade.entry_time.to_rfc3339(),
            format!("{:.8}", trade.entry_price),
            trade.exit_time.to_rfc3339(),
            format!("{:.8}", trade.exit_price),
            format!("{:.8}", trade.quantity),
            trade.reason.as_str().to_string(),
            format!("{:.8}", trade.pnl),
            format!("{:.6}", trade.pnl_pct),
            format!("{:.8}", trade.fees),
        ])?;
    }
    writer.flush()?;
    info!("Wrote {} trades to {}", trades.len(), path.display());
    Ok(())
}

/// Writes the full parameter-search ranking as CSV, best score first.
pub fn export_ranking_csv(path: &Path, results: &[RankedResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record([
        "rank",
        "fast_period",
        "slow_period",
        "take_profit_pct",
        "stop_loss_pct",
        "sharpe",
        "trades",
        "win_rate",
        "return_pct",
        "max_drawdown_pct",
        "final_equity",
        "halted",
    ])?;
    for (rank, result) in results.iter().enumerate() {
        let sharpe = if result.score == f64::NEG_INFINITY {
            String::new()
        } else {
            format!("{:.6}", result.score)
        };
        writer.write_record([
            (rank + 1).to_string(),
            result.config.fast_period.to_string(),
            result.config.slow_period.to_string(),
            format!("{:.6}", result.config.take_profit_pct),
            format!("{:.6}", result.config.stop_loss_pct),
            sharpe,
            result.report.total_trades.to_string(),
            format!("{:.4}", result.report.win_rate),
            format!("{:.6}", result.report.total_return_pct),
            format!("{:.6}", result.report.max_drawdown_pct),
            format!("{:.2}", result.report.final_equity),
            result.report.trading_halted.to_string(),
        ])?;
    }
    writer.flush()?;
    info!(
        "Wrote ranking of {} configurations to {}",
        results.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn trade_csv_round_trips_through_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let trades = vec![TradeRecord {
            position_id: 7,
            entry_time: t,
            entry_price: 100.05,
            exit_time: t + chrono::Duration::hours(2),
            exit_price: 100.35,
            quantity: 2.5,
            reason: ExitReason::TakeProfit,
            pnl: 0.55,
            pnl_pct: 0.0022,
            fees: 0.2,
        }];
        export_trades_csv(&path, &trades).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "7");
        assert_eq!(&rows[0][6], "take_profit");
    }
}
