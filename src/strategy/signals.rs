use crate::config::StrategyParams;
use crate::core::events::{Bar, Timestamp};

/// Simple moving average of the `window` values ending at `end` (inclusive)
pub fn sma(values: &[f64], window: usize, end: usize) -> Option<f64> {
    if window == 0 || end >= values.len() || end + 1 < window {
        return None;
    }
    let slice = &values[end + 1 - window..=end];
    Some(slice.iter().sum::<f64>() / window as f64)
}

/// Indicators derived from one buffer snapshot.
///
/// The trend signal is read on the last two *closed* bars (second and third
/// from the end); dip and spike use the forming bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSnapshot {
    /// +1 when the fast MA is above the slow MA on the last closed bar, else -1
    pub signal_cur: i8,
    pub signal_prev: i8,
    pub current_price: f64,
    pub bar_open: f64,
    pub bar_low: f64,
    pub bar_time: Timestamp,
    pub fast_sma: f64,
    pub slow_sma: f64,
    pub volume_sma: f64,
    pub highest_high: f64,
    /// Lowest low from three bars before the highest high onwards
    pub lowest_low: f64,
    pub dip: bool,
    pub spike: bool,
}

impl SignalSnapshot {
    /// Minimum number of bars `compute` needs for `params`
    pub fn required_bars(params: &StrategyParams) -> usize {
        (params.slow_ma + 2).max(params.volume_ma).max(3)
    }

    /// `None` while the snapshot is too short for the configured windows
    pub fn compute(bars: &[Bar], params: &StrategyParams) -> Option<Self> {
        if bars.len() < Self::required_bars(params) {
            return None;
        }
        let last = bars.len() - 1;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let direction = |end: usize| -> Option<i8> {
            let fast = sma(&closes, params.fast_ma, end)?;
            let slow = sma(&closes, params.slow_ma, end)?;
            Some(if fast > slow { 1 } else { -1 })
        };
        let signal_cur = direction(last - 1)?;
        let signal_prev = direction(last - 2)?;

        let fast_sma = sma(&closes, params.fast_ma, last)?;
        let slow_sma = sma(&closes, params.slow_ma, last)?;
        let volume_sma = sma(&volumes, params.volume_ma, last)?;

        // First occurrence wins on ties
        let (peak_index, highest_high) = bars
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |(bi, bh), (i, b)| if b.high > bh { (i, b.high) } else { (bi, bh) });
        let lowest_low = bars[peak_index.saturating_sub(3)..]
            .iter()
            .map(|b| b.low)
            .fold(f64::INFINITY, f64::min);

        let bar = bars[last];
        Some(Self {
            signal_cur,
            signal_prev,
            current_price: bar.close,
            bar_open: bar.open,
            bar_low: bar.low,
            bar_time: bar.open_time,
            fast_sma,
            slow_sma,
            volume_sma,
            highest_high,
            lowest_low,
            dip: bar.close < slow_sma * params.dip_threshold,
            spike: bar.volume > volume_sma * params.spike_multiplier,
        })
    }

    pub fn bull_cross(&self) -> bool {
        self.signal_cur > 0 && self.signal_prev < 0
    }

    pub fn bear_cross(&self) -> bool {
        self.signal_cur < 0 && self.signal_prev > 0
    }

    /// Fractional fall from the highest high to the lowest low after it
    pub fn drawdown(&self) -> f64 {
        if self.highest_high <= 0.0 {
            return 0.0;
        }
        (self.highest_high - self.lowest_low) / self.highest_high
    }
}
