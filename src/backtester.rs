use crate::config::RunConfig;
use crate::error::DataError;
use crate::ledger::PositionLedger;
use crate::models::{Bar, ClosedLedger, EquityPoint, ExitReason, Signal};
use crate::risk::RiskManager;
use crate::strategy::SignalSource;
use log::{debug, warn};

/// Bar-by-bar simulator. Each run owns a fresh risk manager and ledger, so
/// two runs over the same bars and config produce identical output no
/// matter what ran before or concurrently.
///
/// An accepted entry signal on bar `i` fills at bar `i + 1`'s open; a
/// signal on the final bar is discarded. Exits triggered by the bracket
/// levels fill at the level itself, exit signals fill at the signal bar's
/// close, and whatever is still open when the data ends is closed at the
/// last bar's close.
pub struct SimulationEngine {
    config: RunConfig,
}

impl SimulationEngine {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn run<S: SignalSource>(
        &self,
        bars: &[Bar],
        strategy: &S,
    ) -> Result<ClosedLedger, DataError> {
        if bars.is_empty() {
            return Err(DataError::Empty);
        }

        let signals = strategy.signals_for_series(bars);
        let mut risk = RiskManager::new(&self.config);
        let mut ledger = PositionLedger::new(&self.config);
        let mut cash = self.config.initial_capital;
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut entry_pending = false;

        for (index, bar) in bars.iter().enumerate() {
            risk.observe_day(bar.timestamp.date_naive());

            if entry_pending {
                entry_pending = false;
                cash -= self.fill_entry(bar, &mut risk, &mut ledger, cash);
            }

            for trade in ledger.evaluate_exits(bar, false) {
                cash += self.exit_proceeds(trade.exit_price, trade.quantity);
                risk.record_exit(trade.pnl);
            }

            match signals[index].decision {
                Signal::Exit => {
                    for trade in ledger.evaluate_exits(bar, true) {
                        cash += self.exit_proceeds(trade.exit_price, trade.quantity);
                        risk.record_exit(trade.pnl);
                    }
                }
                Signal::EnterLong if index + 1 < bars.len() => {
                    let provisional = self.provisional_size(&risk, bar.close);
                    match risk.evaluate_entry(provisional) {
                        Ok(()) => entry_pending = true,
                        Err(reason) => {
                            debug!("Entry signal at {} rejected: {}", bar.timestamp, reason)
                        }
                    }
                }
                _ => {}
            }

            let equity = cash + ledger.mark_to_market(bar.close);
            risk.update_equity(equity);
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity,
            });
        }

        let last = &bars[bars.len() - 1];
        for trade in ledger.close_all(last.close, last.timestamp, ExitReason::EndOfData) {
            cash += self.exit_proceeds(trade.exit_price, trade.quantity);
            risk.record_exit(trade.pnl);
        }
        risk.update_equity(cash);
        if let Some(point) = equity_curve.last_mut() {
            point.equity = cash;
        }

        let halted = risk.state().trading_halted;
        let (trades, fills) = ledger.into_records();
        Ok(ClosedLedger {
            trades,
            fills,
            equity_curve,
            initial_capital: self.config.initial_capital,
            final_equity: cash,
            trading_halted: halted,
        })
    }

    /// Fills a pending entry at the bar's open. Size is derived from the
    /// actual fill price, then capped so the position plus its entry fee
    /// fits in available cash. Returns cash consumed (zero if the entry is
    /// dropped).
    fn fill_entry(
        &self,
        bar: &Bar,
        risk: &mut RiskManager,
        ledger: &mut PositionLedger,
        cash: f64,
    ) -> f64 {
        let fill_price = bar.open * (1.0 + self.config.slippage_pct);
        let stop_price = fill_price * (1.0 - self.config.stop_loss_pct);
        let mut size = risk.position_size(fill_price, stop_price);
        let affordable = cash / (fill_price * (1.0 + self.config.fee_rate));
        if size > affordable {
            size = affordable;
        }
        // State may have moved between the decision bar and this fill.
        if let Err(reason) = risk.evaluate_entry(size) {
            debug!("Pending entry at {} dropped: {}", bar.timestamp, reason);
            return 0.0;
        }
        match ledger.open_position(bar.open, bar.timestamp, size) {
            Ok(id) => {
                risk.record_entry();
                debug!(
                    "Opened position {} at {:.4} size {:.6}",
                    id, fill_price, size
                );
                ledger.entry_cost(bar.open, size)
            }
            Err(err) => {
                warn!("Entry at {} refused by ledger: {}", bar.timestamp, err);
                0.0
            }
        }
    }

    fn provisional_size(&self, risk: &RiskManager, reference_price: f64) -> f64 {
        let fill_price = reference_price * (1.0 + self.config.slippage_pct);
        risk.position_size(fill_price, fill_price * (1.0 - self.config.stop_loss_pct))
    }

    fn exit_proceeds(&self, fill_price: f64, quantity: f64) -> f64 {
        let gross = fill_price * quantity;
        gross - gross * self.config.fee_rate
    }
}
