use crate::backtester::SimulationEngine;
use crate::config::{GridSpec, RunConfig};
use crate::performance::{self, PerformanceReport};
use crate::strategy::EmaCrossStrategy;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::models::Bar;

struct SearchTask {
    grid_index: usize,
    config: RunConfig,
}

struct SearchTaskResult {
    grid_index: usize,
    outcome: Result<PerformanceReport, String>,
}

/// One evaluated grid point. `score` is the Sharpe ratio, with the
/// no-trade sentinel already folded in.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub grid_index: usize,
    pub config: RunConfig,
    pub score: f64,
    pub report: PerformanceReport,
}

/// Exhaustive search over the parameter grid. Every grid point gets a
/// fresh engine, so results match sequential single runs exactly; ranking
/// is by score descending with the grid index breaking ties, independent
/// of worker scheduling.
pub struct ParameterSearch {
    base: RunConfig,
    grid: GridSpec,
}

impl ParameterSearch {
    pub fn new(base: RunConfig, grid: GridSpec) -> Self {
        Self { base, grid }
    }

    pub fn run(&self, bars: &[Bar]) -> Result<Vec<RankedResult>> {
        let configs = self.grid.expand(&self.base);
        if configs.is_empty() {
            return Err(anyhow!("parameter grid is empty after filtering"));
        }
        let task_count = configs.len();
        info!("Running {} backtests...", task_count);

        let num_workers = std::cmp::min(task_count, std::cmp::max(1, num_cpus::get()));
        info!("Using {} worker threads", num_workers);

        let (tx, rx): (Sender<SearchTask>, Receiver<SearchTask>) = bounded(task_count);
        let (result_tx, result_rx): (Sender<SearchTaskResult>, Receiver<SearchTaskResult>) =
            bounded(task_count);

        let shared_bars: Arc<Vec<Bar>> = Arc::new(bars.to_vec());
        let mut handles = Vec::new();
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let bars = Arc::clone(&shared_bars);

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let start_time = Instant::now();
                    let outcome = Self::run_single(bars.as_slice(), &task.config);
                    let duration = start_time.elapsed();

                    match &outcome {
                        Ok(report) => info!(
                            "Worker finished task {} in {:.1}s. Sharpe: {:.4}, Trades: {}, Return: {:.2}%, Params: [fast: {}, slow: {}, tp: {:.4}, sl: {:.4}]",
                            task.grid_index,
                            duration.as_secs_f64(),
                            report.sharpe_ratio,
                            report.total_trades,
                            report.total_return_pct * 100.0,
                            task.config.fast_period,
                            task.config.slow_period,
                            task.config.take_profit_pct,
                            task.config.stop_loss_pct
                        ),
                        Err(error) => warn!(
                            "Worker finished task {} in {:.1}s with error: {}",
                            task.grid_index,
                            duration.as_secs_f64(),
                            error
                        ),
                    }

                    let result = SearchTaskResult {
                        grid_index: task.grid_index,
                        outcome,
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }

        for (grid_index, config) in configs.iter().enumerate() {
            tx.send(SearchTask {
                grid_index,
                config: config.clone(),
            })?;
        }
        drop(tx);
        // Workers hold the only remaining senders; if they all die the
        // collection loop sees Disconnected instead of waiting forever.
        drop(result_tx);

        let pb = ProgressBar::new(task_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        let (mut ranked, failed) = Self::collect_results(&result_rx, &configs, &pb);
        pb.finish_and_clear();

        for handle in handles {
            if handle.join().is_err() {
                warn!("A worker thread panicked");
            }
        }

        if failed > 0 {
            warn!("Search completed with {} failed runs", failed);
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.grid_index.cmp(&b.grid_index))
        });
        Ok(ranked)
    }

    /// Drains results until every task is accounted for or the channel
    /// disconnects. All worker senders dropping before `task_count`
    /// results arrive means workers died; the loop stops rather than
    /// waiting for results that can no longer come.
    fn collect_results(
        result_rx: &Receiver<SearchTaskResult>,
        configs: &[RunConfig],
        pb: &ProgressBar,
    ) -> (Vec<RankedResult>, usize) {
        let task_count = configs.len();
        let mut ranked = Vec::with_capacity(task_count);
        let mut completed = 0;
        let mut failed = 0;
        while completed < task_count {
            match result_rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(result) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    match result.outcome {
                        Ok(report) => ranked.push(RankedResult {
                            grid_index: result.grid_index,
                            config: configs[result.grid_index].clone(),
                            score: report.sharpe_ratio,
                            report,
                        }),
                        Err(_) => failed += 1,
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }
        (ranked, failed)
    }

    fn run_single(bars: &[Bar], config: &RunConfig) -> Result<PerformanceReport, String> {
        let strategy = EmaCrossStrategy::from_config(config);
        let engine = SimulationEngine::new(config.clone());
        engine
            .run(bars, &strategy)
            .map(|ledger| performance::evaluate(&ledger))
            .map_err(|e| e.to_string())
    }
}

/// Prints the top `limit` results as a ranking table.
pub fn print_ranking(results: &[RankedResult], limit: usize) {
    info!(
        "{:<5} {:>5} {:>5} {:>8} {:>8} {:>10} {:>8} {:>10}",
        "Rank", "Fast", "Slow", "TP%", "SL%", "Sharpe", "Trades", "Return%"
    );
    for (rank, result) in results.iter().take(limit).enumerate() {
        let sharpe = if result.score == f64::NEG_INFINITY {
            "n/a".to_string()
        } else {
            format!("{:.4}", result.score)
        };
        info!(
            "{:<5} {:>5} {:>5} {:>8.2} {:>8.2} {:>10} {:>8} {:>10.2}",
            rank + 1,
            result.config.fast_period,
            result.config.slow_period,
            result.config.take_profit_pct * 100.0,
            result.config.stop_loss_pct * 100.0,
            sharpe,
            result.report.total_trades,
            result.report.total_return_pct * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trending_bars(count: usize) -> Vec<Bar> {
        // Declines for the first third, then grinds up; enough movement for
        // crossover strategies to trade.
        (0..count)
            .map(|i| {
                let close = if i < count / 3 {
                    200.0 - i as f64
                } else {
                    200.0 - (count / 3) as f64 + (i - count / 3) as f64 * 1.5
                };
                Bar {
                    timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::hours(i as i64),
                    open: close - 0.2,
                    high: close + 0.5,
                    low: close - 0.7,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn small_grid() -> GridSpec {
        GridSpec {
            fast_periods: vec![5, 9],
            slow_periods: vec![15, 21],
            take_profit_pcts: vec![0.01],
            stop_loss_pcts: vec![0.01],
        }
    }

    #[test]
    fn grid_results_match_sequential_runs() {
        let bars = trending_bars(120);
        let base = RunConfig::default();
        let grid = small_grid();

        let ranked = ParameterSearch::new(base.clone(), grid.clone())
            .run(&bars)
            .unwrap();
        assert_eq!(ranked.len(), grid.expand(&base).len());

        for result in &ranked {
            let sequential = ParameterSearch::run_single(&bars, &result.config).unwrap();
            assert_eq!(
                result.report.sharpe_ratio.to_bits(),
                sequential.sharpe_ratio.to_bits()
            );
            assert_eq!(result.report.total_trades, sequential.total_trades);
            assert_eq!(
                result.report.final_equity.to_bits(),
                sequential.final_equity.to_bits()
            );
        }
    }

    #[test]
    fn ranking_is_sorted_and_deterministic() {
        let bars = trending_bars(120);
        let first = ParameterSearch::new(RunConfig::default(), small_grid())
            .run(&bars)
            .unwrap();
        let second = ParameterSearch::new(RunConfig::default(), small_grid())
            .run(&bars)
            .unwrap();

        for window in first.windows(2) {
            assert!(
                window[0].score > window[1].score
                    || (window[0].score == window[1].score
                        && window[0].grid_index < window[1].grid_index)
                    || (window[0].score.is_infinite() && window[1].score.is_infinite())
            );
        }
        let order_a: Vec<usize> = first.iter().map(|r| r.grid_index).collect();
        let order_b: Vec<usize> = second.iter().map(|r| r.grid_index).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn no_trade_configs_rank_last() {
        let bars: Vec<Bar> = (0..100)
            .map(|i| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::hours(i as i64),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 1_000.0,
            })
            .collect();
        let ranked = ParameterSearch::new(RunConfig::default(), small_grid())
            .run(&bars)
            .unwrap();
        // Flat series trades nowhere, so every score is the sentinel.
        assert!(ranked.iter().all(|r| r.score == f64::NEG_INFINITY));
        let indices: Vec<usize> = ranked.iter().map(|r| r.grid_index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn collection_stops_when_all_workers_are_gone() {
        let base = RunConfig::default();
        let configs = small_grid().expand(&base);
        let (result_tx, result_rx) = bounded(configs.len());

        // Workers delivered one result and then all died before the rest.
        result_tx
            .send(SearchTaskResult {
                grid_index: 0,
                outcome: Err("worker gave up".to_string()),
            })
            .unwrap();
        drop(result_tx);

        let pb = ProgressBar::hidden();
        let (ranked, failed) = ParameterSearch::collect_results(&result_rx, &configs, &pb);
        assert!(ranked.is_empty());
        assert_eq!(failed, 1);
    }
}
