//! In-process keyed store for raw market data and derived features.
//!
//! Replaces the Redis-backed store of the system this engine's
//! behavior is grounded on with a single `parking_lot::RwLock`-guarded
//! map, following the same pattern as the teacher's
//! `scrapers/binance_price_feed.rs` (`RwLock<HashMap<Symbol, State>>`).
//! TTLs are enforced lazily on read rather than via a background
//! sweeper, mirroring the original's per-key `EXPIRE` semantics without
//! needing a reaper task.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::models::{
    now_ts, Candle, Depth, FeatureSnapshot, Liquidation, MarkPriceInfo, OiPoint, FundingPoint,
    Timeframe,
};

const DEPTH_TTL_SECS: i64 = 30;
const MARK_PRICE_TTL_SECS: i64 = 60;
const LIQ_TTL_SECS: i64 = 600;
const LIQ_CAP: usize = 200;
const OI_TTL_SECS: i64 = 3600;
const FUNDING_TTL_SECS: i64 = 86_400;

struct Expiring<T> {
    value: T,
    inserted_at: i64,
}

impl<T> Expiring<T> {
    fn new(value: T) -> Self {
        Expiring {
            value,
            inserted_at: now_ts(),
        }
    }

    fn fresh(&self, ttl_secs: i64) -> bool {
        now_ts() - self.inserted_at <= ttl_secs
    }
}

#[derive(Default)]
struct SymbolState {
    latest_kline: HashMap<Timeframe, Expiring<Candle>>,
    closed_klines: HashMap<Timeframe, VecDeque<Candle>>,
    depth: Option<Expiring<Depth>>,
    mark_price: Option<Expiring<MarkPriceInfo>>,
    liquidations: VecDeque<Expiring<Liquidation>>,
    oi_history: VecDeque<OiPoint>,
    funding_history: VecDeque<Expiring<FundingPoint>>,
    features: HashMap<Timeframe, FeatureSnapshot>,
}

pub struct RawStore {
    symbols: RwLock<HashMap<String, SymbolState>>,
    klines_cap: usize,
    oi_cap: usize,
    funding_cap: usize,
}

impl RawStore {
    pub fn new(structure_lookback: usize, atr_period: usize, oi_delta_window: usize, funding_zscore_window: usize) -> Self {
        RawStore {
            symbols: RwLock::new(HashMap::new()),
            klines_cap: structure_lookback + atr_period + 6,
            oi_cap: oi_delta_window + 6,
            funding_cap: funding_zscore_window + 6,
        }
    }

    fn with_symbol_mut<R>(&self, symbol: &str, f: impl FnOnce(&mut SymbolState) -> R) -> R {
        let mut guard = self.symbols.write();
        let state = guard.entry(symbol.to_string()).or_default();
        f(state)
    }

    // --- Klines ---

    pub fn upsert_kline(&self, symbol: &str, tf: Timeframe, candle: Candle) {
        let cap = self.klines_cap;
        self.with_symbol_mut(symbol, |state| {
            state.latest_kline.insert(tf, Expiring::new(candle));
            if candle.closed {
                let deque = state.closed_klines.entry(tf).or_default();
                deque.push_front(candle);
                deque.truncate(cap);
            }
        });
    }

    pub fn get_latest_kline(&self, symbol: &str, tf: Timeframe) -> Option<Candle> {
        let guard = self.symbols.read();
        let state = guard.get(symbol)?;
        let entry = state.latest_kline.get(&tf)?;
        entry.fresh(tf.period_secs() * 10).then_some(entry.value)
    }

    /// Newest-first closed candles.
    pub fn get_klines(&self, symbol: &str, tf: Timeframe) -> Vec<Candle> {
        let guard = self.symbols.read();
        guard
            .get(symbol)
            .and_then(|s| s.closed_klines.get(&tf))
            .map(|d| d.iter().copied().collect())
            .unwrap_or_default()
    }

    // --- Depth ---

    pub fn set_depth(&self, symbol: &str, depth: Depth) {
        self.with_symbol_mut(symbol, |state| {
            state.depth = Some(Expiring::new(depth));
        });
    }

    pub fn get_depth(&self, symbol: &str) -> Option<Depth> {
        let guard = self.symbols.read();
        let entry = guard.get(symbol)?.depth.as_ref()?;
        entry.fresh(DEPTH_TTL_SECS).then(|| entry.value.clone())
    }

    // --- Mark price ---

    pub fn set_mark_price(&self, symbol: &str, info: MarkPriceInfo) {
        self.with_symbol_mut(symbol, |state| {
            state.mark_price = Some(Expiring::new(info));
        });
    }

    pub fn get_mark_price(&self, symbol: &str) -> Option<MarkPriceInfo> {
        let guard = self.symbols.read();
        let entry = guard.get(symbol)?.mark_price.as_ref()?;
        entry.fresh(MARK_PRICE_TTL_SECS).then_some(entry.value)
    }

    // --- Liquidations ---

    pub fn push_liquidation(&self, symbol: &str, liq: Liquidation) {
        self.with_symbol_mut(symbol, |state| {
            state.liquidations.push_front(Expiring::new(liq));
            state.liquidations.truncate(LIQ_CAP);
        });
    }

    /// Liquidations within the last `window_secs` (also bounded by the
    /// list's own TTL), newest first.
    pub fn get_recent_liquidations(&self, symbol: &str, window_secs: i64) -> Vec<Liquidation> {
        let guard = self.symbols.read();
        guard
            .get(symbol)
            .map(|s| {
                s.liquidations
                    .iter()
                    .filter(|e| e.fresh(LIQ_TTL_SECS) && e.fresh(window_secs))
                    .map(|e| e.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The `n` most recent liquidations (also bounded by the list's own
    /// TTL), newest first.
    pub fn get_recent_liquidations_n(&self, symbol: &str, n: usize) -> Vec<Liquidation> {
        let guard = self.symbols.read();
        guard
            .get(symbol)
            .map(|s| {
                s.liquidations
                    .iter()
                    .filter(|e| e.fresh(LIQ_TTL_SECS))
                    .take(n)
                    .map(|e| e.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- Open interest ---

    pub fn push_oi(&self, symbol: &str, point: OiPoint) {
        let cap = self.oi_cap;
        self.with_symbol_mut(symbol, |state| {
            state.oi_history.push_front(point);
            state.oi_history.truncate(cap);
        });
    }

    pub fn get_oi_history(&self, symbol: &str) -> Vec<OiPoint> {
        let guard = self.symbols.read();
        guard
            .get(symbol)
            .map(|s| {
                s.oi_history
                    .iter()
                    .copied()
                    .filter(|p| now_ts() - p.ts <= OI_TTL_SECS)
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- Funding ---

    pub fn push_funding(&self, symbol: &str, point: FundingPoint) {
        let cap = self.funding_cap;
        self.with_symbol_mut(symbol, |state| {
            state.funding_history.push_front(Expiring::new(point));
            state.funding_history.truncate(cap);
        });
    }

    pub fn get_funding_history(&self, symbol: &str) -> Vec<FundingPoint> {
        let guard = self.symbols.read();
        guard
            .get(symbol)
            .map(|s| {
                s.funding_history
                    .iter()
                    .filter(|e| e.fresh(FUNDING_TTL_SECS))
                    .map(|e| e.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn latest_funding(&self, symbol: &str) -> Option<FundingPoint> {
        let guard = self.symbols.read();
        guard
            .get(symbol)?
            .funding_history
            .front()
            .filter(|e| e.fresh(FUNDING_TTL_SECS))
            .map(|e| e.value)
    }

    // --- Features ---

    pub fn set_features(&self, symbol: &str, tf: Timeframe, snapshot: FeatureSnapshot) {
        self.with_symbol_mut(symbol, |state| {
            state.features.insert(tf, snapshot);
        });
    }

    pub fn get_features(&self, symbol: &str, tf: Timeframe) -> Option<FeatureSnapshot> {
        let guard = self.symbols.read();
        guard.get(symbol)?.features.get(&tf).copied()
    }

    pub fn known_symbols(&self) -> Vec<String> {
        self.symbols.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LiqSide;

    fn candle(open_time: i64, closed: bool) -> Candle {
        Candle {
            open_time,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            base_vol: 10.0,
            quote_vol: 1000.0,
            closed,
        }
    }

    #[test]
    fn kline_history_is_newest_first_and_bounded() {
        let store = RawStore::new(3, 2, 5, 5);
        for i in 0..20 {
            store.upsert_kline("BTCUSDT", Timeframe::M1, candle(i, true));
        }
        let history = store.get_klines("BTCUSDT", Timeframe::M1);
        assert!(history.len() <= 3 + 2 + 6);
        assert_eq!(history[0].open_time, 19);
    }

    #[test]
    fn unclosed_candle_updates_latest_but_not_history() {
        let store = RawStore::new(3, 2, 5, 5);
        store.upsert_kline("BTCUSDT", Timeframe::M1, candle(1, false));
        assert!(store.get_klines("BTCUSDT", Timeframe::M1).is_empty());
        assert!(store.get_latest_kline("BTCUSDT", Timeframe::M1).is_some());
    }

    #[test]
    fn liquidation_list_is_capped() {
        let store = RawStore::new(3, 2, 5, 5);
        for i in 0..250 {
            store.push_liquidation(
                "BTCUSDT",
                Liquidation {
                    side: LiqSide::Buy,
                    price: 100.0,
                    qty: 1.0,
                    trade_time: i,
                },
            );
        }
        assert_eq!(store.get_recent_liquidations("BTCUSDT", 10_000).len(), LIQ_CAP);
    }

    #[test]
    fn missing_symbol_returns_empty_defaults() {
        let store = RawStore::new(3, 2, 5, 5);
        assert!(store.get_depth("NOPE").is_none());
        assert!(store.get_klines("NOPE", Timeframe::M1).is_empty());
    }
}
