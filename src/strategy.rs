use crate::config::RunConfig;
use crate::indicators::{calculate_ema, calculate_rsi};
use crate::models::{Bar, Signal};

/// Indicator readings backing one decision, surfaced for logging and reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorValues {
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalOutput {
    pub decision: Signal,
    pub indicators: IndicatorValues,
}

impl SignalOutput {
    pub fn hold() -> Self {
        Self {
            decision: Signal::Hold,
            indicators: IndicatorValues {
                ema_fast: 0.0,
                ema_slow: 0.0,
                rsi: 0.0,
            },
        }
    }
}

/// A signal source is a pure function of its bar window: same window, same
/// decision. The engine never inspects its internals.
pub trait SignalSource: Send + Sync {
    /// Decision for the bar at `index`, given all bars up to and including it.
    fn signal(&self, bars: &[Bar], index: usize) -> SignalOutput;

    /// Bars required before decisions are meaningful.
    fn min_bars(&self) -> usize;

    /// Decisions for a whole historical series. The default evaluates bar by
    /// bar; implementations may compute the series in one pass instead.
    fn signals_for_series(&self, bars: &[Bar]) -> Vec<SignalOutput> {
        (0..bars.len()).map(|i| self.signal(bars, i)).collect()
    }
}

/// EMA crossover with an optional RSI filter. Long-only: enter when the fast
/// EMA crosses above the slow EMA (and RSI sits below the threshold when the
/// filter is on), exit when it crosses back below.
pub struct EmaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    rsi_period: usize,
    rsi_threshold: f64,
    use_rsi_filter: bool,
}

impl EmaCrossStrategy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            fast_period: config.fast_period,
            slow_period: config.slow_period,
            rsi_period: config.rsi_period,
            rsi_threshold: config.rsi_threshold,
            use_rsi_filter: config.use_rsi_filter,
        }
    }

    fn decide_at(
        &self,
        ema_fast: &[f64],
        ema_slow: &[f64],
        rsi: &[f64],
        index: usize,
    ) -> SignalOutput {
        let indicators = IndicatorValues {
            ema_fast: ema_fast[index],
            ema_slow: ema_slow[index],
            rsi: rsi[index],
        };

        if index < self.min_bars() {
            return SignalOutput {
                decision: Signal::Hold,
                indicators,
            };
        }

        let fast_was_below = ema_fast[index - 1] <= ema_slow[index - 1];
        let fast_is_above = ema_fast[index] > ema_slow[index];
        let crossed_up = fast_was_below && fast_is_above;
        let crossed_down = !fast_was_below && !fast_is_above;

        let decision = if crossed_up {
            if self.use_rsi_filter && rsi[index] >= self.rsi_threshold {
                Signal::Hold
            } else {
                Signal::EnterLong
            }
        } else if crossed_down {
            Signal::Exit
        } else {
            Signal::Hold
        };

        SignalOutput {
            decision,
            indicators,
        }
    }
}

impl SignalSource for EmaCrossStrategy {
    fn signal(&self, bars: &[Bar], index: usize) -> SignalOutput {
        if index >= bars.len() || bars.is_empty() {
            return SignalOutput::hold();
        }
        let closes: Vec<f64> = bars[..=index].iter().map(|b| b.close).collect();
        let ema_fast = calculate_ema(&closes, self.fast_period);
        let ema_slow = calculate_ema(&closes, self.slow_period);
        let rsi = calculate_rsi(&closes, self.rsi_period);
        self.decide_at(&ema_fast, &ema_slow, &rsi, index)
    }

    fn min_bars(&self) -> usize {
        self.slow_period.max(self.rsi_period) + 1
    }

    fn signals_for_series(&self, bars: &[Bar]) -> Vec<SignalOutput> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let ema_fast = calculate_ema(&closes, self.fast_period);
        let ema_slow = calculate_ema(&closes, self.slow_period);
        let rsi = calculate_rsi(&closes, self.rsi_period);
        (0..bars.len())
            .map(|i| self.decide_at(&ema_fast, &ema_slow, &rsi, i))
            .collect()
    }
}
