use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Immutable parameters for one engine run. The parameter search produces
/// many of these; each run owns its copy for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    pub rsi_period: usize,
    pub rsi_threshold: f64,
    pub use_rsi_filter: bool,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub fee_rate: f64,
    pub slippage_pct: f64,
    pub risk_per_trade_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_open_positions: usize,
    pub drawdown_halt_pct: f64,
    pub initial_capital: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            rsi_period: 14,
            rsi_threshold: 60.0,
            use_rsi_filter: true,
            take_profit_pct: 0.003,
            stop_loss_pct: 0.003,
            fee_rate: 0.001,
            slippage_pct: 0.0005,
            risk_per_trade_pct: 0.01,
            max_daily_loss_pct: 0.03,
            max_open_positions: 3,
            drawdown_halt_pct: 0.10,
            initial_capital: 10_000.0,
        }
    }
}

impl RunConfig {
    /// Rejects invalid configurations before any run starts. A failed
    /// validation never produces a partial result.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fast_period >= self.slow_period {
            return Err(ConfigError::PeriodOrder {
                fast: self.fast_period,
                slow: self.slow_period,
            });
        }
        for (name, value) in [
            ("take_profit_pct", self.take_profit_pct),
            ("stop_loss_pct", self.stop_loss_pct),
            ("initial_capital", self.initial_capital),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("risk_per_trade_pct", self.risk_per_trade_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("drawdown_halt_pct", self.drawdown_halt_pct),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::RatioOutOfRange { name, value });
            }
        }
        for (name, value) in [
            ("fee_rate", self.fee_rate),
            ("slippage_pct", self.slippage_pct),
        ] {
            if !(value >= 0.0 && value < 1.0) {
                return Err(ConfigError::RatioOutOfRange { name, value });
            }
        }
        if self.max_open_positions == 0 {
            return Err(ConfigError::ZeroPositionCap);
        }
        Ok(())
    }

    /// Minimum bars a signal source needs before decisions are meaningful.
    pub fn warmup_bars(&self) -> usize {
        self.slow_period.max(self.rsi_period) + 1
    }
}

/// Parameter ranges swept by the grid search. Combinations with
/// `fast >= slow` are dropped during expansion.
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub fast_periods: Vec<usize>,
    pub slow_periods: Vec<usize>,
    pub take_profit_pcts: Vec<f64>,
    pub stop_loss_pcts: Vec<f64>,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            fast_periods: (5..=15).collect(),
            slow_periods: (20..=50).collect(),
            take_profit_pcts: vec![0.002, 0.003, 0.004, 0.005, 0.006],
            stop_loss_pcts: vec![0.002, 0.003, 0.004, 0.005, 0.006],
        }
    }
}

impl GridSpec {
    /// Expands the grid into concrete run configurations, inheriting every
    /// non-swept parameter from `base`. Order is deterministic.
    pub fn expand(&self, base: &RunConfig) -> Vec<RunConfig> {
        let mut configs = Vec::new();
        for &fast in &self.fast_periods {
            for &slow in &self.slow_periods {
                if fast >= slow {
                    continue;
                }
                for &tp in &self.take_profit_pcts {
                    for &sl in &self.stop_loss_pcts {
                        configs.push(RunConfig {
                            fast_period: fast,
                            slow_period: slow,
                            take_profit_pct: tp,
                            stop_loss_pct: sl,
                            ..base.clone()
                        });
                    }
                }
            }
        }
        configs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_fast_period_not_below_slow() {
        let config = RunConfig {
            fast_period: 21,
            slow_period: 21,
            ..RunConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::PeriodOrder { fast: 21, slow: 21 })
        );
    }

    #[test]
    fn rejects_non_positive_take_profit() {
        let config = RunConfig {
            take_profit_pct: 0.0,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive {
                name: "take_profit_pct",
                ..
            })
        ));
    }

    #[test]
    fn grid_expansion_drops_inverted_period_pairs() {
        let grid = GridSpec {
            fast_periods: vec![5, 25],
            slow_periods: vec![20, 30],
            take_profit_pcts: vec![0.003],
            stop_loss_pcts: vec![0.003],
        };
        let configs = grid.expand(&RunConfig::default());
        // (5,20), (5,30), (25,30); (25,20) is invalid.
        assert_eq!(configs.len(), 3);
        assert!(configs.iter().all(|c| c.fast_period < c.slow_period));
    }
}
