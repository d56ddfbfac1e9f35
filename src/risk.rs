use crate::config::RunConfig;
use crate::error::RejectReason;
use crate::models::RiskState;
use chrono::NaiveDate;
use log::{debug, warn};

/// Gatekeeper for every proposed entry and bookkeeper of cumulative risk
/// state. One instance per run; parameter-search workers each construct
/// their own so no state leaks between runs.
pub struct RiskManager {
    state: RiskState,
    risk_per_trade_pct: f64,
    max_daily_loss_pct: f64,
    max_open_positions: usize,
    drawdown_halt_pct: f64,
}

impl RiskManager {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            state: RiskState::new(config.initial_capital),
            risk_per_trade_pct: config.risk_per_trade_pct,
            max_daily_loss_pct: config.max_daily_loss_pct,
            max_open_positions: config.max_open_positions,
            drawdown_halt_pct: config.drawdown_halt_pct,
        }
    }

    /// Rebuilds a manager from persisted state, used by live restarts.
    pub fn from_state(config: &RunConfig, state: RiskState) -> Self {
        Self {
            state,
            risk_per_trade_pct: config.risk_per_trade_pct,
            max_daily_loss_pct: config.max_daily_loss_pct,
            max_open_positions: config.max_open_positions,
            drawdown_halt_pct: config.drawdown_halt_pct,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Halts trading for the remainder of the run, outside the drawdown
    /// path. Used when venue retries are exhausted.
    pub fn halt_trading(&mut self, reason: &str) {
        if !self.state.trading_halted {
            self.state.trading_halted = true;
            warn!("Trading halted: {}", reason);
        }
    }

    /// Rolls the daily tracking window when the UTC calendar day of the
    /// event stream advances. Daily loss accrual restarts from the equity
    /// standing at the boundary; the drawdown peak is never reset.
    pub fn observe_day(&mut self, day: NaiveDate) {
        if self.state.current_day != Some(day) {
            if let Some(previous) = self.state.current_day {
                debug!(
                    "Day rolled {} -> {}; yesterday's realized PnL {:+.2}",
                    previous, day, self.state.daily_realized_pnl
                );
            }
            self.state.current_day = Some(day);
            self.state.daily_realized_pnl = 0.0;
            self.state.daily_start_equity = self.state.equity_current;
        }
    }

    /// Sizes a trade so that a stop-loss hit loses `risk_per_trade_pct` of
    /// current equity. Computed once at entry time and never re-derived.
    pub fn position_size(&self, entry_price: f64, stop_loss_price: f64) -> f64 {
        let stop_distance = entry_price - stop_loss_price;
        if stop_distance <= 0.0 {
            return 0.0;
        }
        let risk_amount = self.state.equity_current * self.risk_per_trade_pct;
        risk_amount / stop_distance
    }

    /// May this entry proceed? All rejections are non-fatal: the caller
    /// receives a typed reason and the run continues.
    pub fn evaluate_entry(&self, proposed_size: f64) -> Result<(), RejectReason> {
        if self.state.trading_halted {
            return Err(RejectReason::TradingHalted);
        }
        if self.state.open_position_count >= self.max_open_positions {
            return Err(RejectReason::MaxOpenPositions);
        }
        if self.state.daily_start_equity > 0.0 {
            let daily_loss = (-self.state.daily_realized_pnl).max(0.0);
            if daily_loss / self.state.daily_start_equity >= self.max_daily_loss_pct {
                return Err(RejectReason::DailyLossLimit);
            }
        }
        if proposed_size <= 0.0 {
            return Err(RejectReason::ZeroSize);
        }
        Ok(())
    }

    pub fn record_entry(&mut self) {
        self.state.open_position_count += 1;
    }

    /// Books the realized PnL of a closed position and re-checks the
    /// circuit breaker.
    pub fn record_exit(&mut self, pnl: f64) {
        self.state.open_position_count = self.state.open_position_count.saturating_sub(1);
        self.state.daily_realized_pnl += pnl;
        self.update_equity(self.state.equity_current + pnl);
    }

    /// Marks equity to market and trips the circuit breaker when drawdown
    /// reaches the configured threshold. The halt is permanent for the run.
    pub fn update_equity(&mut self, equity: f64) {
        self.state.equity_current = equity;
        if equity > self.state.equity_peak {
            self.state.equity_peak = equity;
        }
        self.check_halt();
    }

    pub fn check_halt(&mut self) -> bool {
        if !self.state.trading_halted && self.state.drawdown() >= self.drawdown_halt_pct {
            self.state.trading_halted = true;
            warn!(
                "Circuit breaker tripped: drawdown {:.2}% >= {:.2}%; no further entries this run",
                self.state.drawdown() * 100.0,
                self.drawdown_halt_pct * 100.0
            );
        }
        self.state.trading_halted
    }
}
