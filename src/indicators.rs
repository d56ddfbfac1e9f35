//! Pure indicator math over close-price series. Stateless; callers pass a
//! window and read the trailing values.

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period <= 1 || prices.len() < period {
        return prices.to_vec();
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for _ in 0..period - 1 {
        sma_values.push(prices[0]);
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// Wilder-smoothed RSI. Values before `period + 1` samples are a neutral 50.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let n = prices.len();
    if n == 0 {
        return Vec::new();
    }
    if period == 0 || n < period + 1 {
        return vec![50.0; n];
    }

    let mut rsi_values = vec![50.0; n];

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    rsi_values[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in period + 1..n {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_matches_rolling_mean() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&prices, 3);
        assert_eq!(sma.len(), prices.len());
        assert!((sma[2] - 2.0).abs() < 1e-12);
        assert!((sma[4] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn ema_tracks_price_direction() {
        let prices: Vec<f64> = (1..=50).map(|v| v as f64).collect();
        let fast = calculate_ema(&prices, 5);
        let slow = calculate_ema(&prices, 20);
        // In a monotonic uptrend the fast EMA sits above the slow EMA.
        assert!(fast.last().unwrap() > slow.last().unwrap());
    }

    #[test]
    fn rsi_saturates_on_straight_gains() {
        let prices: Vec<f64> = (1..=40).map(|v| v as f64).collect();
        let rsi = calculate_rsi(&prices, 14);
        assert!((rsi.last().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_is_neutral_during_warmup() {
        let prices = vec![10.0, 11.0, 12.0];
        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi.iter().all(|v| (*v - 50.0).abs() < 1e-12));
    }
}
