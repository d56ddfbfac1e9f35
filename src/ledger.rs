use crate::config::RunConfig;
use crate::error::CapacityError;
use crate::models::{
    Bar, ExitReason, Fill, FillReason, FillSide, Position, PositionStatus, TradeRecord,
};
use chrono::{DateTime, Utc};

/// Owns the lifecycle of every position in a run: open positions in
/// insertion order, the append-only fill log, and the realized trade
/// records. Fill mechanics (slippage, fees, bracket levels) live here so
/// the simulation engine and the live coordinator price exits identically.
pub struct PositionLedger {
    capacity: usize,
    next_id: u64,
    open: Vec<Position>,
    fills: Vec<Fill>,
    trades: Vec<TradeRecord>,
    fee_rate: f64,
    slippage_pct: f64,
    take_profit_pct: f64,
    stop_loss_pct: f64,
}

impl PositionLedger {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            capacity: config.max_open_positions,
            next_id: 0,
            open: Vec::new(),
            fills: Vec::new(),
            trades: Vec::new(),
            fee_rate: config.fee_rate,
            slippage_pct: config.slippage_pct,
            take_profit_pct: config.take_profit_pct,
            stop_loss_pct: config.stop_loss_pct,
        }
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn into_records(self) -> (Vec<TradeRecord>, Vec<Fill>) {
        (self.trades, self.fills)
    }

    /// Cash consumed by an entry at `raw_price`, slippage and fee included.
    pub fn entry_cost(&self, raw_price: f64, size: f64) -> f64 {
        let fill_price = raw_price * (1.0 + self.slippage_pct);
        fill_price * size * (1.0 + self.fee_rate)
    }

    /// Opens a long position filled at `raw_price` adjusted unfavorably by
    /// slippage. Bracket levels are derived from the fill price and are
    /// immutable for the life of the position. The risk manager gates
    /// entries before this is called; the capacity check here guards the
    /// invariant independently.
    pub fn open_position(
        &mut self,
        raw_price: f64,
        timestamp: DateTime<Utc>,
        size: f64,
    ) -> Result<u64, CapacityError> {
        let fill_price = raw_price * (1.0 + self.slippage_pct);
        self.open_filled(fill_price, self.slippage_pct, timestamp, size)
    }

    /// Opens a position at an already-known fill price, as reported by a
    /// venue. The modeled fee rate still applies; no slippage is added.
    pub fn open_at_fill(
        &mut self,
        fill_price: f64,
        timestamp: DateTime<Utc>,
        size: f64,
    ) -> Result<u64, CapacityError> {
        self.open_filled(fill_price, 0.0, timestamp, size)
    }

    fn open_filled(
        &mut self,
        fill_price: f64,
        slippage_applied: f64,
        timestamp: DateTime<Utc>,
        size: f64,
    ) -> Result<u64, CapacityError> {
        if self.open.len() >= self.capacity {
            return Err(CapacityError(self.capacity));
        }
        let fee = fill_price * size * self.fee_rate;
        let id = self.next_id;
        self.next_id += 1;
        self.open.push(Position {
            id,
            entry_price: fill_price,
            entry_time: timestamp,
            size,
            take_profit_price: fill_price * (1.0 + self.take_profit_pct),
            stop_loss_price: fill_price * (1.0 - self.stop_loss_pct),
            entry_fee: fee,
            status: PositionStatus::Open,
        });
        self.fills.push(Fill {
            position_id: id,
            side: FillSide::Buy,
            price: fill_price,
            quantity: size,
            fee,
            slippage_applied,
            timestamp,
            reason: FillReason::Entry,
        });
        Ok(id)
    }

    /// Re-seats previously persisted open positions, e.g. after a live
    /// restart. Ids continue past the highest restored id.
    pub fn restore_open(&mut self, positions: Vec<Position>) {
        for position in positions {
            self.next_id = self.next_id.max(position.id + 1);
            self.open.push(position);
        }
    }

    /// Scans open positions in insertion order and closes any whose exit
    /// condition the bar satisfies. Within one bar the stop-loss is checked
    /// before the take-profit: when a bar's range spans both levels the
    /// position exits at the stop. A pending exit signal closes every
    /// position the brackets left open, at the bar's close.
    pub fn evaluate_exits(&mut self, bar: &Bar, signal_exit: bool) -> Vec<TradeRecord> {
        let mut closed = Vec::new();
        let mut index = 0;
        while index < self.open.len() {
            match Self::exit_decision(&self.open[index], bar, signal_exit) {
                Some((raw_price, reason)) => {
                    let position = self.open.remove(index);
                    closed.push(self.settle(position, raw_price, bar.timestamp, reason));
                }
                None => index += 1,
            }
        }
        closed
    }

    fn exit_decision(position: &Position, bar: &Bar, signal_exit: bool) -> Option<(f64, ExitReason)> {
        if bar.low <= position.stop_loss_price {
            Some((position.stop_loss_price, ExitReason::StopLoss))
        } else if bar.high >= position.take_profit_price {
            Some((position.take_profit_price, ExitReason::TakeProfit))
        } else if signal_exit {
            Some((bar.close, ExitReason::Signal))
        } else {
            None
        }
    }

    /// Positions the bar would close, without closing them. Live trading
    /// uses this to place the venue order first and book locally once the
    /// fill is confirmed.
    pub fn exit_candidates(&self, bar: &Bar, signal_exit: bool) -> Vec<(u64, f64, ExitReason)> {
        self.open
            .iter()
            .filter_map(|p| {
                Self::exit_decision(p, bar, signal_exit).map(|(price, reason)| (p.id, price, reason))
            })
            .collect()
    }

    /// Closes one position at an already-known fill price, as reported by
    /// a venue.
    pub fn close_at_fill(
        &mut self,
        id: u64,
        fill_price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> Option<TradeRecord> {
        let index = self.open.iter().position(|p| p.id == id)?;
        let position = self.open.remove(index);
        Some(self.settle_filled(position, fill_price, 0.0, timestamp, reason))
    }

    /// Closes every remaining open position at `raw_price`, used when the
    /// data ends or the run is shut down.
    pub fn close_all(
        &mut self,
        raw_price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> Vec<TradeRecord> {
        let mut closed = Vec::new();
        while !self.open.is_empty() {
            let position = self.open.remove(0);
            closed.push(self.settle(position, raw_price, timestamp, reason));
        }
        closed
    }

    /// Marks open positions to `price` and returns their liquidation value
    /// net of projected exit fees.
    pub fn mark_to_market(&self, price: f64) -> f64 {
        self.open
            .iter()
            .map(|p| {
                let proceeds = price * p.size;
                proceeds - proceeds * self.fee_rate
            })
            .sum()
    }

    fn settle(
        &mut self,
        position: Position,
        raw_price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> TradeRecord {
        let fill_price = raw_price * (1.0 - self.slippage_pct);
        self.settle_filled(position, fill_price, self.slippage_pct, timestamp, reason)
    }

    fn settle_filled(
        &mut self,
        mut position: Position,
        fill_price: f64,
        slippage_applied: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> TradeRecord {
        let fee = fill_price * position.size * self.fee_rate;
        position.status = PositionStatus::Closed;
        self.fills.push(Fill {
            position_id: position.id,
            side: FillSide::Sell,
            price: fill_price,
            quantity: position.size,
            fee,
            slippage_applied,
            timestamp,
            reason: FillReason::Exit(reason),
        });
        let fees = position.entry_fee + fee;
        let pnl = (fill_price - position.entry_price) * position.size - fees;
        let entry_notional = position.entry_price * position.size;
        let record = TradeRecord {
            position_id: position.id,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time: timestamp,
            exit_price: fill_price,
            quantity: position.size,
            reason,
            pnl,
            pnl_pct: if entry_notional > 0.0 {
                pnl / entry_notional
            } else {
                0.0
            },
            fees,
        };
        self.trades.push(record.clone());
        record
    }
}
