use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Decision produced by a signal source for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    EnterLong,
    Hold,
    Exit,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::EnterLong => "enter_long",
            Signal::Hold => "hold",
            Signal::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Signal,
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Signal => "exit_signal",
            ExitReason::EndOfData => "end_of_data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillSide {
    Buy,
    Sell,
}

impl FillSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillSide::Buy => "buy",
            FillSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillReason {
    Entry,
    Exit(ExitReason),
}

impl FillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillReason::Entry => "entry",
            FillReason::Exit(reason) => reason.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// One long position. TP/SL levels are fixed at entry and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub size: f64,
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
    pub entry_fee: f64,
    pub status: PositionStatus,
}

/// Append-only execution record. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub position_id: u64,
    pub side: FillSide,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub slippage_applied: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: FillReason,
}

/// One completed round trip, for the output ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: u64,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub quantity: f64,
    pub reason: ExitReason,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub fees: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Cumulative risk state for one run. `trading_halted`, once set, stays set
/// for the remainder of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_realized_pnl: f64,
    pub daily_start_equity: f64,
    pub current_day: Option<chrono::NaiveDate>,
    pub equity_peak: f64,
    pub equity_current: f64,
    pub open_position_count: usize,
    pub trading_halted: bool,
}

impl RiskState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            daily_realized_pnl: 0.0,
            daily_start_equity: initial_capital,
            current_day: None,
            equity_peak: initial_capital,
            equity_current: initial_capital,
            open_position_count: 0,
            trading_halted: false,
        }
    }

    pub fn drawdown(&self) -> f64 {
        if self.equity_peak > 0.0 {
            (self.equity_peak - self.equity_current) / self.equity_peak
        } else {
            0.0
        }
    }
}

/// Everything one finished simulation run produced.
#[derive(Debug, Clone)]
pub struct ClosedLedger {
    pub trades: Vec<TradeRecord>,
    pub fills: Vec<Fill>,
    pub equity_curve: Vec<EquityPoint>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub trading_halted: bool,
}
