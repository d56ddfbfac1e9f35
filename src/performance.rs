use crate::models::ClosedLedger;
use statrs::statistics::Statistics;
use std::fmt;

/// Periods per year for annualizing the Sharpe ratio, assuming hourly bars.
const PERIODS_PER_YEAR: f64 = 24.0 * 365.0;

/// Summary metrics for one completed run. `sharpe_ratio` is
/// `f64::NEG_INFINITY` for runs with no trades, which sorts those runs
/// behind every run that actually traded.
#[derive(Debug, Clone)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_pnl: f64,
    pub total_fees: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub final_equity: f64,
    pub trading_halted: bool,
}

pub fn evaluate(ledger: &ClosedLedger) -> PerformanceReport {
    let total_trades = ledger.trades.len();
    let winning_trades = ledger.trades.iter().filter(|t| t.pnl > 0.0).count();
    let losing_trades = ledger.trades.iter().filter(|t| t.pnl < 0.0).count();
    let total_pnl: f64 = ledger.trades.iter().map(|t| t.pnl).sum();
    let total_fees: f64 = ledger.trades.iter().map(|t| t.fees).sum();
    let gross_profit: f64 = ledger
        .trades
        .iter()
        .filter(|t| t.pnl > 0.0)
        .map(|t| t.pnl)
        .sum();
    let gross_loss: f64 = ledger
        .trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| -t.pnl)
        .sum();

    PerformanceReport {
        total_trades,
        winning_trades,
        losing_trades,
        win_rate: if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        },
        profit_factor: if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        },
        total_pnl,
        total_fees,
        total_return_pct: if ledger.initial_capital > 0.0 {
            (ledger.final_equity - ledger.initial_capital) / ledger.initial_capital
        } else {
            0.0
        },
        max_drawdown_pct: max_drawdown(ledger),
        sharpe_ratio: sharpe_ratio(ledger),
        final_equity: ledger.final_equity,
        trading_halted: ledger.trading_halted,
    }
}

/// Annualized Sharpe over per-bar equity returns, zero risk-free rate. A
/// run that never traded carries no return information, so it scores the
/// sentinel rather than 0/0.
fn sharpe_ratio(ledger: &ClosedLedger) -> f64 {
    if ledger.trades.is_empty() {
        return f64::NEG_INFINITY;
    }
    let returns: Vec<f64> = ledger
        .equity_curve
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| w[1].equity / w[0].equity - 1.0)
        .collect();
    // Traded, but the curve is too short to estimate variance. Score a
    // flat 0.0 so a tiny real run does not sort with the never-traded runs.
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.clone().mean();
    let std_dev = returns.std_dev();
    if std_dev == 0.0 || !std_dev.is_finite() {
        return 0.0;
    }
    mean / std_dev * PERIODS_PER_YEAR.sqrt()
}

/// Worst peak-to-trough decline of the equity curve, as a fraction.
fn max_drawdown(ledger: &ClosedLedger) -> f64 {
    let mut peak = ledger.initial_capital;
    let mut worst = 0.0f64;
    for point in &ledger.equity_curve {
        if point.equity > peak {
            peak = point.equity;
        } else if peak > 0.0 {
            worst = worst.max((peak - point.equity) / peak);
        }
    }
    worst
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trades:        {}", self.total_trades)?;
        writeln!(
            f,
            "Win rate:      {:.1}% ({} wins / {} losses)",
            self.win_rate * 100.0,
            self.winning_trades,
            self.losing_trades
        )?;
        writeln!(f, "Profit factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Total PnL:     {:+.2}", self.total_pnl)?;
        writeln!(f, "Fees paid:     {:.2}", self.total_fees)?;
        writeln!(f, "Return:        {:+.2}%", self.total_return_pct * 100.0)?;
        writeln!(f, "Max drawdown:  {:.2}%", self.max_drawdown_pct * 100.0)?;
        if self.sharpe_ratio == f64::NEG_INFINITY {
            writeln!(f, "Sharpe:        n/a (no trades)")?;
        } else {
            writeln!(f, "Sharpe:        {:.3}", self.sharpe_ratio)?;
        }
        write!(f, "Final equity:  {:.2}", self.final_equity)?;
        if self.trading_halted {
            write!(f, "\nRun halted by drawdown circuit breaker")?;
        }
        Ok(())
    }
}
