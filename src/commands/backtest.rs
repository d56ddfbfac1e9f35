use crate::backtester::SimulationEngine;
use crate::config::RunConfig;
use crate::data::load_bars_csv;
use crate::performance;
use crate::report::export_trades_csv;
use crate::strategy::EmaCrossStrategy;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(data_file: &Path, config: RunConfig, trades_out: Option<&Path>) -> Result<()> {
    config.validate()?;
    info!(
        "Backtesting EMA {}/{} TP {:.2}% SL {:.2}% on {}",
        config.fast_period,
        config.slow_period,
        config.take_profit_pct * 100.0,
        config.stop_loss_pct * 100.0,
        data_file.display()
    );

    let bars = load_bars_csv(data_file)?;
    let strategy = EmaCrossStrategy::from_config(&config);
    let engine = SimulationEngine::new(config);
    let ledger = engine.run(&bars, &strategy)?;
    let report = performance::evaluate(&ledger);

    println!("{}", report);

    if let Some(path) = trades_out {
        export_trades_csv(path, &ledger.trades)?;
    }
    Ok(())
}
