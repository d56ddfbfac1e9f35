use crate::config::RunConfig;
use crate::error::VenueError;
use crate::ledger::PositionLedger;
use crate::models::{Bar, ExitReason, FillSide, Position, RiskState, Signal, TradeRecord};
use crate::retry::retry_venue_operation;
use crate::risk::RiskManager;
use crate::strategy::SignalSource;
use crate::venue::{OrderAck, OrderState, Venue};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

const ORDER_POLL_DELAY: Duration = Duration::from_millis(500);

/// Runtime knobs for the live loop, separate from the strategy/risk
/// parameters in `RunConfig`.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub poll_interval: Duration,
    pub state_path: PathBuf,
    /// Bars of history kept in memory for indicator evaluation.
    pub history_bars: usize,
    /// Optional stale-acknowledgement watchdog: cancel an order that has
    /// not reached a terminal state within this window. `None` keeps
    /// polling until the venue resolves the order.
    pub order_timeout: Option<Duration>,
}

/// Snapshot written to disk after every processed bar so a restart can
/// resume with its book and risk counters intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveState {
    pub updated_at: DateTime<Utc>,
    pub cash: f64,
    pub risk: RiskState,
    pub open_positions: Vec<Position>,
    pub trades: Vec<TradeRecord>,
}

/// Single-writer event loop for live trading. All order placement and
/// book mutation happens on this task; bars arrive over a channel and a
/// watch flag requests shutdown. Every await point is cancellable without
/// leaving the book half-updated because venue fills are confirmed before
/// the local ledger is touched.
pub struct LiveCoordinator<V: Venue, S: SignalSource> {
    venue: V,
    strategy: S,
    config: RunConfig,
    settings: LiveSettings,
    risk: RiskManager,
    ledger: PositionLedger,
    cash: f64,
    bars: Vec<Bar>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<V: Venue, S: SignalSource> LiveCoordinator<V, S> {
    pub fn new(venue: V, strategy: S, config: RunConfig, settings: LiveSettings) -> Self {
        let risk = RiskManager::new(&config);
        let ledger = PositionLedger::new(&config);
        let cash = config.initial_capital;
        Self {
            venue,
            strategy,
            config,
            settings,
            risk,
            ledger,
            cash,
            bars: Vec::new(),
            shutdown: None,
        }
    }

    pub async fn run(
        mut self,
        mut bar_rx: mpsc::Receiver<Bar>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        self.shutdown = Some(shutdown_rx.clone());
        self.restore_state()?;
        self.reconcile().await?;
        self.bars = retry_venue_operation!(
            "bootstrap bar history",
            self.venue.recent_bars(self.settings.history_bars)
        )
        .map_err(|e| anyhow!(e))?;
        info!("Bootstrapped {} bars of history", self.bars.len());

        loop {
            tokio::select! {
                maybe_bar = bar_rx.recv() => match maybe_bar {
                    Some(bar) => {
                        if let Err(err) = self.on_bar(bar).await {
                            error!("Bar processing failed: {:#}", err);
                            self.shutdown().await?;
                            return Err(err);
                        }
                    }
                    None => {
                        warn!("Bar stream closed; shutting down");
                        self.shutdown().await?;
                        return Ok(());
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown requested");
                        self.shutdown().await?;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handles one closed bar: bracket exits first, then the strategy
    /// decision, then persistence. Entries act on this bar's close since
    /// it is the freshest tradable price once the bar has closed.
    async fn on_bar(&mut self, bar: Bar) -> Result<()> {
        if let Some(last) = self.bars.last() {
            if bar.timestamp <= last.timestamp {
                return Ok(());
            }
        }
        self.risk.observe_day(bar.timestamp.date_naive());
        self.bars.push(bar);
        if self.bars.len() > self.settings.history_bars {
            let excess = self.bars.len() - self.settings.history_bars;
            self.bars.drain(..excess);
        }

        for (id, reference_price, reason) in self.ledger.exit_candidates(&bar, false) {
            self.close_on_venue(id, reference_price, reason, bar.timestamp)
                .await?;
        }

        let output = self.strategy.signal(&self.bars, self.bars.len() - 1);
        match output.decision {
            Signal::Exit => {
                for (id, reference_price, reason) in self.ledger.exit_candidates(&bar, true) {
                    self.close_on_venue(id, reference_price, reason, bar.timestamp)
                        .await?;
                }
            }
            Signal::EnterLong => self.try_enter(&bar).await?,
            Signal::Hold => {}
        }

        let equity = self.cash + self.ledger.mark_to_market(bar.close);
        self.risk.update_equity(equity);
        self.persist_state(bar.timestamp)?;
        Ok(())
    }

    async fn try_enter(&mut self, bar: &Bar) -> Result<()> {
        let stop_price = bar.close * (1.0 - self.config.stop_loss_pct);
        let mut size = self.risk.position_size(bar.close, stop_price);
        let affordable = self.cash / (bar.close * (1.0 + self.config.fee_rate));
        if size > affordable {
            size = affordable;
        }
        if let Err(reason) = self.risk.evaluate_entry(size) {
            info!("Entry signal at {} rejected: {}", bar.timestamp, reason);
            return Ok(());
        }

        let order = self.execute_market(FillSide::Buy, size, bar.close);
        let fill_price = match self.race_shutdown(order).await {
            Ok(price) => price,
            Err(VenueError::Interrupted) => {
                info!("Entry abandoned: shutdown requested before the fill confirmed");
                return Ok(());
            }
            Err(VenueError::RetriesExhausted { context, source }) => {
                self.risk.halt_trading(&format!(
                    "venue unreachable while entering ({}: {})",
                    context, source
                ));
                return Ok(());
            }
            Err(VenueError::Rejected { status, message }) => {
                warn!("Venue rejected entry ({}): {}", status, message);
                return Ok(());
            }
            Err(err) => return Err(err).context("entry order failed"),
        };

        match self.ledger.open_at_fill(fill_price, bar.timestamp, size) {
            Ok(id) => {
                self.risk.record_entry();
                self.cash -= fill_price * size * (1.0 + self.config.fee_rate);
                info!(
                    "Opened position {} at {:.8} size {:.8}",
                    id, fill_price, size
                );
            }
            Err(err) => {
                // Order already filled on the venue; flatten it back out.
                error!("Ledger refused filled entry: {}; closing on venue", err);
                self.execute_market(FillSide::Sell, size, fill_price)
                    .await
                    .map_err(|e| anyhow!(e))
                    .context("failed to flatten surplus position")?;
            }
        }
        Ok(())
    }

    /// Places the venue order first and books the close only after the
    /// fill confirms. Venue failure while exiting is fatal: the book can
    /// no longer be trusted to match the venue.
    async fn close_on_venue(
        &mut self,
        position_id: u64,
        reference_price: f64,
        reason: ExitReason,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let size = self
            .ledger
            .open_positions()
            .iter()
            .find(|p| p.id == position_id)
            .map(|p| p.size)
            .ok_or_else(|| anyhow!("position {} missing from ledger", position_id))?;

        let order = self.execute_market(FillSide::Sell, size, reference_price);
        let fill_price = match self.race_shutdown(order).await {
            Ok(price) => price,
            Err(VenueError::Interrupted) => {
                // No fill confirmed, so nothing is booked; the position
                // stays open and the shutdown snapshot carries it.
                warn!(
                    "Exit for position {} abandoned: shutdown requested before the fill confirmed",
                    position_id
                );
                return Ok(());
            }
            Err(err) => {
                return Err(anyhow!(err))
                    .with_context(|| format!("exit order for position {} failed", position_id))
            }
        };

        if let Some(trade) = self
            .ledger
            .close_at_fill(position_id, fill_price, timestamp, reason)
        {
            self.cash += fill_price * size * (1.0 - self.config.fee_rate);
            self.risk.record_exit(trade.pnl);
            info!(
                "Closed position {} at {:.8} ({}) PnL {:+.2}",
                position_id,
                fill_price,
                reason.as_str(),
                trade.pnl
            );
        }
        Ok(())
    }

    /// Races a venue order against the shutdown flag. Placement retries
    /// and fill polling are long suspensions; flipping the flag aborts
    /// them mid-wait so the loop can persist the book and stop.
    async fn race_shutdown<F>(&self, order: F) -> Result<f64, VenueError>
    where
        F: std::future::Future<Output = Result<f64, VenueError>>,
    {
        let Some(rx) = self.shutdown.as_ref() else {
            return order.await;
        };
        let mut rx = rx.clone();
        if *rx.borrow() {
            return Err(VenueError::Interrupted);
        }
        tokio::select! {
            result = order => result,
            // A closed sender counts as a shutdown request, same as the
            // run loop treats it.
            _ = rx.changed() => Err(VenueError::Interrupted),
        }
    }

    /// Submits a market order with retry and polls it to a terminal state.
    /// Returns the average fill price.
    async fn execute_market(
        &self,
        side: FillSide,
        quantity: f64,
        reference_price: f64,
    ) -> Result<f64, VenueError> {
        let ack = retry_venue_operation!(
            format!("place {} order", side.as_str()),
            self.venue.place_market_order(side, quantity)
        )?;
        self.await_fill(ack, reference_price).await
    }

    async fn await_fill(&self, ack: OrderAck, reference_price: f64) -> Result<f64, VenueError> {
        if ack.state == OrderState::Rejected {
            return Err(VenueError::Rejected {
                status: 400,
                message: format!("order {} rejected on submission", ack.order_id),
            });
        }
        let submitted_at = tokio::time::Instant::now();
        loop {
            let update = retry_venue_operation!(
                format!("poll order {}", ack.order_id),
                self.venue.order_status(&ack.order_id)
            )?;
            match update.state {
                OrderState::Filled => {
                    return Ok(update.avg_fill_price.unwrap_or(reference_price))
                }
                OrderState::Rejected => {
                    return Err(VenueError::Rejected {
                        status: 400,
                        message: format!("order {} rejected by venue", ack.order_id),
                    })
                }
                OrderState::Cancelled => {
                    return Err(VenueError::Rejected {
                        status: 409,
                        message: format!("order {} cancelled before filling", ack.order_id),
                    })
                }
                OrderState::Submitted => {
                    // Without the watchdog configured the order is watched
                    // until the venue resolves it one way or the other.
                    match self.settings.order_timeout {
                        Some(limit) if submitted_at.elapsed() >= limit => break,
                        _ => sleep(ORDER_POLL_DELAY).await,
                    }
                }
            }
        }
        warn!(
            "Order {} still unresolved after the acknowledgement window; cancelling",
            ack.order_id
        );
        retry_venue_operation!(
            format!("cancel order {}", ack.order_id),
            self.venue.cancel_order(&ack.order_id)
        )?;
        Err(VenueError::Rejected {
            status: 408,
            message: format!("order {} not filled before timeout", ack.order_id),
        })
    }

    /// Compares the persisted book against the venue and clears stale
    /// working orders left behind by a previous run. A position mismatch
    /// halts new entries until the book is reconciled by hand.
    async fn reconcile(&mut self) -> Result<()> {
        let snapshot = retry_venue_operation!("account snapshot", self.venue.account_snapshot())
            .map_err(|e| anyhow!(e))?;
        for order in &snapshot.open_orders {
            warn!("Cancelling stale order {} from a previous run", order.order_id);
            retry_venue_operation!(
                format!("cancel stale order {}", order.order_id),
                self.venue.cancel_order(&order.order_id)
            )
            .map_err(|e| anyhow!(e))?;
        }
        let local_quantity: f64 = self.ledger.open_positions().iter().map(|p| p.size).sum();
        if (snapshot.position_quantity - local_quantity).abs() > 1e-9 {
            // The venue is ground truth. A book that disagrees with it
            // cannot size or gate new entries, so entries stop here; exits
            // for whatever the book does hold stay allowed.
            self.risk.halt_trading(&format!(
                "venue position {:.8} differs from local book {:.8}; manual reconciliation required",
                snapshot.position_quantity, local_quantity
            ));
        }
        info!(
            "Reconciled with venue: cash {:.2}, equity {:.2}, {} open orders cancelled",
            snapshot.cash,
            snapshot.equity,
            snapshot.open_orders.len()
        );
        Ok(())
    }

    fn restore_state(&mut self) -> Result<()> {
        if !self.settings.state_path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.settings.state_path).with_context(|| {
            format!("failed to read {}", self.settings.state_path.display())
        })?;
        let state: LiveState = serde_json::from_str(&raw).with_context(|| {
            format!("failed to parse {}", self.settings.state_path.display())
        })?;
        info!(
            "Restoring state from {} (updated {}): {} open positions, cash {:.2}",
            self.settings.state_path.display(),
            state.updated_at,
            state.open_positions.len(),
            state.cash
        );
        self.cash = state.cash;
        self.risk = RiskManager::from_state(&self.config, state.risk);
        self.ledger.restore_open(state.open_positions);
        Ok(())
    }

    fn persist_state(&self, updated_at: DateTime<Utc>) -> Result<()> {
        let state = LiveState {
            updated_at,
            cash: self.cash,
            risk: self.risk.state().clone(),
            open_positions: self.ledger.open_positions().to_vec(),
            trades: self.ledger.trades().to_vec(),
        };
        let raw = serde_json::to_string_pretty(&state)?;
        std::fs::write(&self.settings.state_path, raw).with_context(|| {
            format!("failed to write {}", self.settings.state_path.display())
        })?;
        Ok(())
    }

    /// Persists the final state and stops. Open positions are left standing
    /// on the venue; the snapshot re-seats them on the next start.
    async fn shutdown(&mut self) -> Result<()> {
        for position in self.ledger.open_positions() {
            info!(
                "Leaving position {} open at shutdown (entry {:.8}, size {:.8})",
                position.id, position.entry_price, position.size
            );
        }
        self.persist_state(Utc::now())?;
        info!(
            "Shutdown complete; cash {:.2}, {} positions left open",
            self.cash,
            self.ledger.open_count()
        );
        Ok(())
    }
}

/// Polls the venue for newly closed bars and forwards them to the
/// coordinator. Runs until the shutdown flag flips or the channel closes.
pub async fn poll_bar_feed<V: Venue>(
    venue: &V,
    poll_interval: Duration,
    tx: mpsc::Sender<Bar>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut last_sent: Option<DateTime<Utc>> = None;
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let bars = match retry_venue_operation!("fetch bars", venue.recent_bars(2)) {
                    Ok(bars) => bars,
                    Err(err) => {
                        error!("Bar feed failed: {}", err);
                        return Err(anyhow!(err));
                    }
                };
                for bar in bars {
                    if last_sent.map_or(true, |t| bar.timestamp > t) {
                        last_sent = Some(bar.timestamp);
                        if tx.send(bar).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{SignalOutput, SignalSource};
    use crate::venue::{AccountSnapshot, OrderUpdate};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Fills every market order instantly at the scripted price.
    struct InstantFillVenue {
        next_order: AtomicU64,
        fill_price: Mutex<f64>,
        snapshot_position: Mutex<f64>,
        orders: Mutex<Vec<(FillSide, f64)>>,
        bars: Vec<Bar>,
    }

    impl InstantFillVenue {
        fn new(bars: Vec<Bar>) -> Self {
            Self {
                next_order: AtomicU64::new(1),
                fill_price: Mutex::new(0.0),
                snapshot_position: Mutex::new(0.0),
                orders: Mutex::new(Vec::new()),
                bars,
            }
        }
    }

    impl Venue for InstantFillVenue {
        async fn place_market_order(
            &self,
            side: FillSide,
            quantity: f64,
        ) -> Result<OrderAck, VenueError> {
            self.orders.lock().unwrap().push((side, quantity));
            let id = self.next_order.fetch_add(1, Ordering::SeqCst);
            Ok(OrderAck {
                order_id: id.to_string(),
                state: OrderState::Submitted,
            })
        }

        async fn order_status(&self, order_id: &str) -> Result<OrderUpdate, VenueError> {
            Ok(OrderUpdate {
                order_id: order_id.to_string(),
                state: OrderState::Filled,
                filled_quantity: 1.0,
                avg_fill_price: Some(*self.fill_price.lock().unwrap()),
            })
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<bool, VenueError> {
            Ok(true)
        }

        async fn account_snapshot(&self) -> Result<AccountSnapshot, VenueError> {
            Ok(AccountSnapshot {
                cash: 10_000.0,
                equity: 10_000.0,
                position_quantity: *self.snapshot_position.lock().unwrap(),
                open_orders: Vec::new(),
            })
        }

        async fn recent_bars(&self, limit: usize) -> Result<Vec<Bar>, VenueError> {
            let start = self.bars.len().saturating_sub(limit);
            Ok(self.bars[start..].to_vec())
        }
    }

    /// Accepts orders but never resolves them; counts cancellations.
    struct StuckOrderVenue {
        cancels: std::sync::Arc<AtomicU64>,
        bars: Vec<Bar>,
    }

    impl Venue for StuckOrderVenue {
        async fn place_market_order(
            &self,
            _side: FillSide,
            _quantity: f64,
        ) -> Result<OrderAck, VenueError> {
            Ok(OrderAck {
                order_id: "stuck-1".to_string(),
                state: OrderState::Submitted,
            })
        }

        async fn order_status(&self, order_id: &str) -> Result<OrderUpdate, VenueError> {
            Ok(OrderUpdate {
                order_id: order_id.to_string(),
                state: OrderState::Submitted,
                filled_quantity: 0.0,
                avg_fill_price: None,
            })
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<bool, VenueError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn account_snapshot(&self) -> Result<AccountSnapshot, VenueError> {
            Ok(AccountSnapshot {
                cash: 10_000.0,
                equity: 10_000.0,
                position_quantity: 0.0,
                open_orders: Vec::new(),
            })
        }

        async fn recent_bars(&self, limit: usize) -> Result<Vec<Bar>, VenueError> {
            let start = self.bars.len().saturating_sub(limit);
            Ok(self.bars[start..].to_vec())
        }
    }

    /// Enters on the first live bar it sees, then holds.
    struct EnterOnceStrategy;

    impl SignalSource for EnterOnceStrategy {
        fn signal(&self, bars: &[Bar], index: usize) -> SignalOutput {
            let decision = if index == bars.len() - 1 && bars.len() == 11 {
                Signal::EnterLong
            } else {
                Signal::Hold
            };
            SignalOutput {
                decision,
                indicators: Default::default(),
            }
        }

        fn min_bars(&self) -> usize {
            1
        }
    }

    fn bar_at(hour: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 100.0,
        }
    }

    fn settings(dir: &std::path::Path) -> LiveSettings {
        LiveSettings {
            poll_interval: Duration::from_millis(10),
            state_path: dir.join("state.json"),
            history_bars: 50,
            order_timeout: None,
        }
    }

    #[tokio::test]
    async fn enters_on_signal_and_keeps_position_through_shutdown() {
        let dir = tempdir().unwrap();
        let history: Vec<Bar> = (0..10).map(|h| bar_at(h, 100.0)).collect();
        let venue = InstantFillVenue::new(history);
        *venue.fill_price.lock().unwrap() = 100.0;

        let config = RunConfig {
            fee_rate: 0.0,
            slippage_pct: 0.0,
            take_profit_pct: 0.10,
            stop_loss_pct: 0.10,
            ..RunConfig::default()
        };
        let coordinator = LiveCoordinator::new(
            venue,
            EnterOnceStrategy,
            config,
            settings(dir.path()),
        );

        let (bar_tx, bar_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = async {
            bar_tx.send(bar_at(10, 100.0)).await.unwrap();
            // Quiet bar so the position survives, then shut down.
            bar_tx.send(bar_at(11, 100.1)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(true).unwrap();
            Ok::<_, anyhow::Error>(())
        };
        let (run, _) = tokio::join!(coordinator.run(bar_rx, shutdown_rx), driver);
        run.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        let state: LiveState = serde_json::from_str(&raw).unwrap();
        // Shutdown never liquidates; the position survives in the snapshot.
        assert_eq!(state.open_positions.len(), 1);
        assert!(state.trades.is_empty());
        assert!((state.open_positions[0].entry_price - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn state_snapshot_restores_open_positions() {
        let dir = tempdir().unwrap();
        let history: Vec<Bar> = (0..10).map(|h| bar_at(h, 100.0)).collect();

        let config = RunConfig {
            fee_rate: 0.0,
            slippage_pct: 0.0,
            take_profit_pct: 0.10,
            stop_loss_pct: 0.10,
            ..RunConfig::default()
        };

        // First run: enter and leave the position open.
        {
            let venue = InstantFillVenue::new(history.clone());
            *venue.fill_price.lock().unwrap() = 100.0;
            let coordinator = LiveCoordinator::new(
                venue,
                EnterOnceStrategy,
                config.clone(),
                settings(dir.path()),
            );
            let (bar_tx, bar_rx) = mpsc::channel(8);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let driver = async {
                bar_tx.send(bar_at(10, 100.0)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
                drop(bar_tx);
                drop(shutdown_tx);
            };
            let (run, _) = tokio::join!(coordinator.run(bar_rx, shutdown_rx), driver);
            run.unwrap();
        }

        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        let state: LiveState = serde_json::from_str(&raw).unwrap();
        // Stream close shuts down without liquidating.
        assert_eq!(state.open_positions.len(), 1);

        // A fresh coordinator re-seats the book from the snapshot.
        let venue = InstantFillVenue::new(history);
        let mut restored = LiveCoordinator::new(
            venue,
            EnterOnceStrategy,
            config,
            settings(dir.path()),
        );
        restored.restore_state().unwrap();
        assert!((restored.cash - state.cash).abs() < 1e-9);
        assert_eq!(restored.ledger.open_count(), 1);
        assert_eq!(restored.risk.state().open_position_count, 1);
    }

    fn test_config() -> RunConfig {
        RunConfig {
            fee_rate: 0.0,
            slippage_pct: 0.0,
            take_profit_pct: 0.10,
            stop_loss_pct: 0.10,
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn venue_position_mismatch_halts_entries() {
        let dir = tempdir().unwrap();
        let history: Vec<Bar> = (0..10).map(|h| bar_at(h, 100.0)).collect();
        let venue = InstantFillVenue::new(history);
        *venue.fill_price.lock().unwrap() = 100.0;
        // The venue holds a position the local book knows nothing about.
        *venue.snapshot_position.lock().unwrap() = 1.0;

        let coordinator =
            LiveCoordinator::new(venue, EnterOnceStrategy, test_config(), settings(dir.path()));
        let (bar_tx, bar_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = async {
            bar_tx.send(bar_at(10, 100.0)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(true).unwrap();
        };
        let (run, _) = tokio::join!(coordinator.run(bar_rx, shutdown_rx), driver);
        run.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        let state: LiveState = serde_json::from_str(&raw).unwrap();
        // Divergence halts entries rather than trading on local memory.
        assert!(state.risk.trading_halted);
        assert!(state.open_positions.is_empty());
        assert!(state.trades.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_the_fill_wait_without_cancelling() {
        let dir = tempdir().unwrap();
        let history: Vec<Bar> = (0..10).map(|h| bar_at(h, 100.0)).collect();
        let cancels = std::sync::Arc::new(AtomicU64::new(0));
        let venue = StuckOrderVenue {
            cancels: std::sync::Arc::clone(&cancels),
            bars: history,
        };

        let coordinator =
            LiveCoordinator::new(venue, EnterOnceStrategy, test_config(), settings(dir.path()));
        let (bar_tx, bar_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = async {
            bar_tx.send(bar_at(10, 100.0)).await.unwrap();
            // The entry order never resolves; the shutdown flag must cut
            // the fill wait short.
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(true).unwrap();
        };
        let (run, _) = tokio::join!(coordinator.run(bar_rx, shutdown_rx), driver);
        run.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        let state: LiveState = serde_json::from_str(&raw).unwrap();
        assert!(state.open_positions.is_empty());
        assert!(state.trades.is_empty());
        // No watchdog configured, so the abort leaves the order alone.
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fill_watchdog_cancels_only_when_configured() {
        let dir = tempdir().unwrap();
        let history: Vec<Bar> = (0..10).map(|h| bar_at(h, 100.0)).collect();
        let cancels = std::sync::Arc::new(AtomicU64::new(0));
        let venue = StuckOrderVenue {
            cancels: std::sync::Arc::clone(&cancels),
            bars: history,
        };

        let mut live_settings = settings(dir.path());
        live_settings.order_timeout = Some(Duration::from_millis(700));
        let coordinator =
            LiveCoordinator::new(venue, EnterOnceStrategy, test_config(), live_settings);
        let (bar_tx, bar_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = async {
            bar_tx.send(bar_at(10, 100.0)).await.unwrap();
            // Leave the shutdown line quiet so the watchdog, not the
            // shutdown race, resolves the stuck order.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(bar_tx);
            drop(shutdown_tx);
        };
        let (run, _) = tokio::join!(coordinator.run(bar_rx, shutdown_rx), driver);
        run.unwrap();

        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        let state: LiveState = serde_json::from_str(&raw).unwrap();
        assert!(state.open_positions.is_empty());
    }
}
