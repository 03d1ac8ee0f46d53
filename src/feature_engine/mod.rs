//! Feature Engine: recomputes a symbol's per-timeframe derived
//! features whenever the Raw Store changes, plus a staleness sweep
//! that recomputes symbols nothing has touched recently. Grounded on
//! `original_source/app/features/engine.py`'s dual-loop architecture.

pub mod computations;
pub mod mtf;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::models::{now_ts, FeatureSnapshot, Timeframe};
use crate::raw_store::RawStore;
use crate::update_bus::UpdateBusReceiver;

const STALENESS_SWEEP_INTERVAL_SECS: u64 = 10;
const STALENESS_THRESHOLD_SECS: i64 = 10;

pub struct FeatureEngine {
    store: Arc<RawStore>,
    cfg: Config,
    last_computed: Arc<Mutex<HashMap<(String, Timeframe), i64>>>,
}

impl FeatureEngine {
    pub fn new(store: Arc<RawStore>, cfg: Config) -> Self {
        FeatureEngine {
            store,
            cfg,
            last_computed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Recomputes features for a single symbol across every configured
    /// timeframe, writing the result back into the Raw Store.
    pub fn recompute_symbol(&self, symbol: &str) {
        for &tf in &self.cfg.timeframes {
            self.recompute_symbol_timeframe(symbol, tf);
        }
    }

    fn recompute_symbol_timeframe(&self, symbol: &str, tf: Timeframe) {
        let candles = self.store.get_klines(symbol, tf);
        if candles.is_empty() {
            return;
        }

        let structure_state = computations::structure_state(&candles);
        let (breakout, breakout_level) = computations::breakout(&candles, self.cfg.structure_lookback);
        let atr = computations::atr(&candles, self.cfg.atr_period);
        let range_expansion = computations::range_expansion(&candles, self.cfg.atr_period);
        let ema_slope = computations::ema_slope(&candles, self.cfg.ema_fast, 3);
        let vwap_distance = computations::vwap_distance(&candles, self.cfg.vwap_period);

        let oi_history = self.store.get_oi_history(symbol);
        let oi_delta = computations::oi_delta(&oi_history, self.cfg.oi_delta_window);

        let funding_history = self.store.get_funding_history(symbol);
        let funding_zscore = computations::funding_zscore(&funding_history, self.cfg.funding_zscore_window);

        let liqs = self.store.get_recent_liquidations_n(symbol, self.cfg.liq_ratio_window);
        let liq_stats = computations::liquidation_stats(&liqs);

        let (ob_imbalance, bid_wall, ask_wall) = match self.store.get_depth(symbol) {
            Some(depth) => {
                let f = computations::orderbook_features(&depth, self.cfg.wall_pressure_threshold);
                (f.ob_imbalance, f.bid_wall, f.ask_wall)
            }
            None => (0.0, false, false),
        };

        let snapshot = FeatureSnapshot {
            structure_state,
            breakout,
            breakout_level,
            atr,
            range_expansion,
            ema_slope,
            vwap_distance,
            oi_delta,
            funding_zscore,
            liq_long: liq_stats.liq_long,
            liq_short: liq_stats.liq_short,
            liq_ratio: liq_stats.liq_ratio,
            liq_total_usd: liq_stats.liq_total_usd,
            ob_imbalance,
            bid_wall,
            ask_wall,
            ts: now_ts(),
        };

        self.store.set_features(symbol, tf, snapshot);
        self.last_computed.lock().insert((symbol.to_string(), tf), now_ts());
    }

    /// Reactive loop: recomputes whichever symbols the Update Bus marks
    /// dirty, batching concurrent marks into one recompute pass each.
    pub async fn run_reactive(&self, mut updates: UpdateBusReceiver, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Relaxed) {
            let Some(batch) = updates.recv_batch().await else {
                break;
            };
            let mut symbols: Vec<String> = batch.into_iter().map(|u| u.symbol).collect();
            symbols.sort();
            symbols.dedup();
            for symbol in symbols {
                self.recompute_symbol(&symbol);
            }
        }
    }

    /// Staleness loop: periodically recomputes any known symbol whose
    /// features haven't been touched recently, catching symbols the
    /// reactive path missed (e.g. due to a dropped bus update).
    pub async fn run_staleness_sweep(&self, shutdown: Arc<AtomicBool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(STALENESS_SWEEP_INTERVAL_SECS));
        while !shutdown.load(Ordering::Relaxed) {
            tick.tick().await;
            let now = now_ts();
            for symbol in self.store.known_symbols() {
                for &tf in &self.cfg.timeframes {
                    let stale = self
                        .last_computed
                        .lock()
                        .get(&(symbol.clone(), tf))
                        .map(|t| now - t > STALENESS_THRESHOLD_SECS)
                        .unwrap_or(true);
                    if stale {
                        self.recompute_symbol_timeframe(&symbol, tf);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candle;

    fn candle(n: i64) -> Candle {
        Candle {
            open_time: n,
            open: 100.0 + n as f64,
            high: 101.0 + n as f64,
            low: 99.0 + n as f64,
            close: 100.5 + n as f64,
            base_vol: 1.0,
            quote_vol: 100.0,
            closed: true,
        }
    }

    #[test]
    fn recompute_populates_features_for_known_symbol() {
        let store = Arc::new(RawStore::new(20, 14, 10, 50));
        for i in 0..10 {
            store.upsert_kline("BTCUSDT", Timeframe::M5, candle(i));
        }
        let cfg = Config::from_env();
        let engine = FeatureEngine::new(store.clone(), cfg);
        engine.recompute_symbol_timeframe("BTCUSDT", Timeframe::M5);
        assert!(store.get_features("BTCUSDT", Timeframe::M5).is_some());
    }

    #[test]
    fn recompute_skips_symbol_without_candles() {
        let store = Arc::new(RawStore::new(20, 14, 10, 50));
        let cfg = Config::from_env();
        let engine = FeatureEngine::new(store.clone(), cfg);
        engine.recompute_symbol_timeframe("NOPE", Timeframe::M5);
        assert!(store.get_features("NOPE", Timeframe::M5).is_none());
    }
}
