//! Pure per-symbol feature formulas, ported field-for-field from
//! `original_source/app/features/computations.py`. Division-by-zero
//! and empty-input edge cases fall back to the neutral value named in
//! each function's doc comment rather than NaN/inf.

use statrs::statistics::Statistics;

use crate::models::{Breakout, Candle, Depth, FundingPoint, Liquidation, LiqSide, OiPoint, StructureState};

/// Higher-high/higher-low swing comparison over two consecutive
/// 3-candle windows. Neutral when fewer than 6 candles are available.
pub fn structure_state(candles_newest_first: &[Candle]) -> StructureState {
    if candles_newest_first.len() < 6 {
        return StructureState::Neutral;
    }
    let recent_high = candles_newest_first[0..3].iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let recent_low = candles_newest_first[0..3].iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let prev_high = candles_newest_first[3..6].iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let prev_low = candles_newest_first[3..6].iter().map(|c| c.low).fold(f64::MAX, f64::min);

    if recent_high > prev_high && recent_low > prev_low {
        StructureState::Uptrend
    } else if recent_high < prev_high && recent_low < prev_low {
        StructureState::Downtrend
    } else {
        StructureState::Neutral
    }
}

/// Breakout of the prior `lookback` candles' high/low by the latest
/// close. Returns `(Breakout, level)`; level is 0.0 when `None`.
pub fn breakout(candles_newest_first: &[Candle], lookback: usize) -> (Breakout, f64) {
    if candles_newest_first.len() < 2 {
        return (Breakout::None, 0.0);
    }
    let latest = &candles_newest_first[0];
    let window = &candles_newest_first[1..(lookback + 1).min(candles_newest_first.len())];
    if window.is_empty() {
        return (Breakout::None, 0.0);
    }
    let prior_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let prior_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if latest.close > prior_high {
        (Breakout::Bullish, prior_high)
    } else if latest.close < prior_low {
        (Breakout::Bearish, prior_low)
    } else {
        (Breakout::None, 0.0)
    }
}

/// Mean True Range over `period` candles. 0.0 when fewer than 2 candles.
pub fn atr(candles_newest_first: &[Candle], period: usize) -> f64 {
    if candles_newest_first.len() < 2 {
        return 0.0;
    }
    let n = period.min(candles_newest_first.len() - 1);
    let mut sum = 0.0;
    for i in 0..n {
        let cur = &candles_newest_first[i];
        let prev = &candles_newest_first[i + 1];
        let tr = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());
        sum += tr;
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Latest true range divided by the rolling ATR. Neutral value 1.0 when
/// ATR is zero.
pub fn range_expansion(candles_newest_first: &[Candle], period: usize) -> f64 {
    let a = atr(candles_newest_first, period);
    if candles_newest_first.is_empty() {
        return 1.0;
    }
    let latest = &candles_newest_first[0];
    let tr = if candles_newest_first.len() > 1 {
        let prev = &candles_newest_first[1];
        (latest.high - latest.low)
            .max((latest.high - prev.close).abs())
            .max((latest.low - prev.close).abs())
    } else {
        latest.high - latest.low
    };
    if a <= f64::EPSILON {
        1.0
    } else {
        tr / a
    }
}

fn ema_series(closes_oldest_first: &[f64], period: usize) -> Vec<f64> {
    if closes_oldest_first.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(closes_oldest_first.len());
    out.push(closes_oldest_first[0]);
    for &c in &closes_oldest_first[1..] {
        let prev = *out.last().unwrap();
        out.push(c * k + prev * (1.0 - k));
    }
    out
}

/// Normalized EMA change over `lookback` candles: `(ema[-1] - ema[-1-lookback]) / ema[-1-lookback]`.
/// Neutral value 0.0 when there isn't enough history or the reference is zero.
pub fn ema_slope(candles_newest_first: &[Candle], period: usize, lookback: usize) -> f64 {
    if candles_newest_first.len() <= lookback {
        return 0.0;
    }
    let closes_oldest_first: Vec<f64> = candles_newest_first.iter().rev().map(|c| c.close).collect();
    let ema = ema_series(&closes_oldest_first, period);
    let len = ema.len();
    if len <= lookback {
        return 0.0;
    }
    let latest = ema[len - 1];
    let reference = ema[len - 1 - lookback];
    if reference.abs() <= f64::EPSILON {
        0.0
    } else {
        (latest - reference) / reference
    }
}

/// `(close - vwap) / vwap` over `period` candles. Neutral 0.0 when vwap
/// is zero or there's no history.
pub fn vwap_distance(candles_newest_first: &[Candle], period: usize) -> f64 {
    if candles_newest_first.is_empty() {
        return 0.0;
    }
    let n = period.min(candles_newest_first.len());
    let window = &candles_newest_first[..n];
    let total_qv: f64 = window.iter().map(|c| c.quote_vol).sum();
    if total_qv <= f64::EPSILON {
        return 0.0;
    }
    let typical_qv: f64 = window
        .iter()
        .map(|c| ((c.high + c.low + c.close) / 3.0) * c.quote_vol)
        .sum();
    let vwap = typical_qv / total_qv;
    if vwap.abs() <= f64::EPSILON {
        0.0
    } else {
        (candles_newest_first[0].close - vwap) / vwap
    }
}

/// Percent change in open interest between the latest point and the
/// point `window` samples back. Neutral 0.0 when the window doesn't
/// have a reference point or the reference is zero.
pub fn oi_delta(history_newest_first: &[OiPoint], window: usize) -> f64 {
    if window == 0 || history_newest_first.len() <= window {
        return 0.0;
    }
    let rates = &history_newest_first[..window + 1];
    let latest = rates[0].oi;
    let reference = rates[window].oi;
    if reference.abs() <= f64::EPSILON {
        0.0
    } else {
        (latest - reference) / reference
    }
}

/// Z-score of the latest funding rate against the `window` most recent
/// samples. Neutral 0.0 when there isn't a full window or stddev is zero.
pub fn funding_zscore(history_newest_first: &[FundingPoint], window: usize) -> f64 {
    if window < 2 || history_newest_first.len() < window {
        return 0.0;
    }
    let rates: Vec<f64> = history_newest_first[..window].iter().map(|p| p.funding_rate).collect();
    let slice: &[f64] = &rates;
    let mean = slice.mean();
    let stddev = slice.population_std_dev();
    if stddev <= f64::EPSILON {
        0.0
    } else {
        (rates[0] - mean) / stddev
    }
}

pub struct LiqStats {
    pub liq_long: u32,
    pub liq_short: u32,
    pub liq_ratio: f64,
    pub liq_total_usd: f64,
}

/// Counts and dollar total for a liquidation window. A `Sell`-side
/// force order closes a long; a `Buy`-side force order closes a short.
/// `liq_ratio` is long/short, neutral 1.0 when short count is zero.
pub fn liquidation_stats(liqs: &[Liquidation]) -> LiqStats {
    let mut liq_long = 0u32;
    let mut liq_short = 0u32;
    let mut total_usd = 0.0;
    for l in liqs {
        match l.side {
            LiqSide::Sell => liq_long += 1,
            LiqSide::Buy => liq_short += 1,
        }
        total_usd += l.price * l.qty;
    }
    let liq_ratio = if liq_short == 0 {
        1.0
    } else {
        liq_long as f64 / liq_short as f64
    };
    LiqStats {
        liq_long,
        liq_short,
        liq_ratio,
        liq_total_usd: total_usd,
    }
}

pub struct OrderbookFeatures {
    pub ob_imbalance: f64,
    pub bid_wall: bool,
    pub ask_wall: bool,
}

/// `(bid_size - ask_size) / (bid_size + ask_size)` over the top-of-book
/// levels, plus wall detection (single level at least
/// `wall_pressure_threshold` times the mean level size on its side).
/// Neutral 0.0 imbalance when the book is empty on both sides.
pub fn orderbook_features(depth: &Depth, wall_pressure_threshold: f64) -> OrderbookFeatures {
    let bid_size: f64 = depth.bids.iter().map(|(_, sz)| sz).sum();
    let ask_size: f64 = depth.asks.iter().map(|(_, sz)| sz).sum();
    let ob_imbalance = if bid_size + ask_size <= f64::EPSILON {
        0.0
    } else {
        (bid_size - ask_size) / (bid_size + ask_size)
    };

    let bid_wall = has_wall(&depth.bids, wall_pressure_threshold);
    let ask_wall = has_wall(&depth.asks, wall_pressure_threshold);

    OrderbookFeatures {
        ob_imbalance,
        bid_wall,
        ask_wall,
    }
}

fn has_wall(levels: &[(f64, f64)], threshold: f64) -> bool {
    if levels.len() < 2 {
        return false;
    }
    let mean = levels.iter().map(|(_, sz)| sz).sum::<f64>() / levels.len() as f64;
    if mean <= f64::EPSILON {
        return false;
    }
    levels.iter().any(|(_, sz)| sz / mean >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open: close,
            high,
            low,
            close,
            base_vol: 1.0,
            quote_vol: close * 10.0,
            closed: true,
        }
    }

    #[test]
    fn structure_state_detects_uptrend() {
        // Newest-first: indices 0..3 (recent) sit above indices 3..6 (prior)
        // on both highs and lows.
        let candles = vec![
            candle(30.0, 28.0, 29.0),
            candle(29.0, 27.0, 28.0),
            candle(28.0, 26.0, 27.0),
            candle(20.0, 18.0, 19.0),
            candle(19.0, 17.0, 18.0),
            candle(18.0, 16.0, 17.0),
        ];
        assert_eq!(structure_state(&candles), StructureState::Uptrend);
    }

    #[test]
    fn structure_state_neutral_with_insufficient_history() {
        let candles = vec![candle(10.0, 9.0, 9.5)];
        assert_eq!(structure_state(&candles), StructureState::Neutral);
    }

    #[test]
    fn breakout_detects_bullish() {
        let candles = vec![candle(15.0, 14.0, 14.9), candle(10.0, 9.0, 9.5), candle(10.0, 9.0, 9.5)];
        let (b, level) = breakout(&candles, 2);
        assert_eq!(b, Breakout::Bullish);
        assert_eq!(level, 10.0);
    }

    #[test]
    fn atr_zero_with_single_candle() {
        let candles = vec![candle(10.0, 9.0, 9.5)];
        assert_eq!(atr(&candles, 14), 0.0);
    }

    #[test]
    fn oi_delta_neutral_on_empty() {
        assert_eq!(oi_delta(&[], 6), 0.0);
    }

    #[test]
    fn funding_zscore_neutral_without_spread() {
        let points = vec![
            FundingPoint { funding_rate: 0.01, mark: 1.0, index: 1.0, next_funding_time: 0, ts: 0 },
            FundingPoint { funding_rate: 0.01, mark: 1.0, index: 1.0, next_funding_time: 0, ts: 0 },
        ];
        assert_eq!(funding_zscore(&points, 2), 0.0);
    }

    #[test]
    fn liquidation_ratio_neutral_without_shorts() {
        let liqs = vec![Liquidation { side: LiqSide::Sell, price: 100.0, qty: 1.0, trade_time: 0 }];
        let stats = liquidation_stats(&liqs);
        assert_eq!(stats.liq_ratio, 1.0);
        assert_eq!(stats.liq_long, 1);
    }

    #[test]
    fn orderbook_imbalance_neutral_when_empty() {
        let depth = Depth { bids: vec![], asks: vec![], ts: 0 };
        let f = orderbook_features(&depth, 5.0);
        assert_eq!(f.ob_imbalance, 0.0);
        assert!(!f.bid_wall);
    }
}
