//! Signal Engine: consumes the Event Queue, runs the gate sequence
//! (openness, feature availability, MTF alignment, scoring, threshold,
//! optional AI overlay), arms and emits signals. Grounded on
//! `original_source/app/signals/engine.py`.

pub mod scoring;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::config::Config;
use crate::feature_engine::mtf;
use crate::models::{now_ts, DirectionalPredictor, Event, FeatureSnapshot, Signal, Timeframe, WsEvent};
use crate::persistence::SignalRepository;
use crate::raw_store::RawStore;
use crate::tracker::Tracker;

pub struct SignalEngine {
    store: Arc<RawStore>,
    cfg: Config,
    tracker: Arc<Tracker>,
    repository: Arc<dyn SignalRepository>,
    broadcast_tx: broadcast::Sender<WsEvent>,
    ai_overlay: Option<Arc<dyn DirectionalPredictor>>,
    pending_events: Mutex<HashMap<String, Vec<Event>>>,
    last_eval: Mutex<HashMap<String, i64>>,
}

impl SignalEngine {
    pub fn new(
        store: Arc<RawStore>,
        cfg: Config,
        tracker: Arc<Tracker>,
        repository: Arc<dyn SignalRepository>,
        broadcast_tx: broadcast::Sender<WsEvent>,
        ai_overlay: Option<Arc<dyn DirectionalPredictor>>,
    ) -> Self {
        SignalEngine {
            store,
            cfg,
            tracker,
            repository,
            broadcast_tx,
            ai_overlay,
            pending_events: Mutex::new(HashMap::new()),
            last_eval: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Relaxed) {
            let Some(event) = events.recv().await else {
                break;
            };
            let _ = self.repository.append_event(event.clone()).await;
            let symbol = event.symbol().to_string();
            self.pending_events.lock().entry(symbol.clone()).or_default().push(event);
            self.evaluate(&symbol).await;
        }
    }

    async fn evaluate(&self, symbol: &str) {
        // Gate A: openness (no open signal) or cooldown elapsed.
        let cooldown_ok = {
            let last = *self.last_eval.lock().get(symbol).unwrap_or(&0);
            now_ts() - last >= self.cfg.signal_cooldown_seconds
        };
        if self.tracker.has_open_signal(symbol) || !cooldown_ok {
            return;
        }

        // Gate B: features present for every configured timeframe.
        let mut per_tf_features: HashMap<Timeframe, FeatureSnapshot> = HashMap::new();
        for &tf in &self.cfg.timeframes {
            match self.store.get_features(symbol, tf) {
                Some(f) => {
                    per_tf_features.insert(tf, f);
                }
                None => return,
            }
        }
        let primary = per_tf_features[&self.cfg.primary_timeframe];

        let events = {
            let mut pending = self.pending_events.lock();
            pending.remove(symbol).unwrap_or_default()
        };

        let scored = scoring::score_signal(&primary, &events);

        // Gate C: MTF alignment, fail-open on internal inconsistency.
        let votes: Vec<Option<crate::models::Direction>> = self
            .cfg
            .timeframes
            .iter()
            .map(|tf| per_tf_features.get(tf).and_then(mtf::timeframe_direction))
            .collect();
        let mtf_result = mtf::evaluate_alignment(&votes, scored.direction, &self.cfg);
        if self.cfg.mtf_alignment_required && !mtf_result.aligned {
            self.last_eval.lock().insert(symbol.to_string(), now_ts());
            return;
        }

        // Gate D: score threshold.
        if scored.score < self.cfg.signal_score_threshold {
            self.last_eval.lock().insert(symbol.to_string(), now_ts());
            return;
        }

        // Optional AI overlay: disabled by default; when enabled it can
        // veto but never invents a direction on its own.
        if self.cfg.ai_overlay_enabled {
            if let Some(predictor) = &self.ai_overlay {
                let prediction = predictor.predict(&primary);
                let confidence = match scored.direction {
                    crate::models::Direction::Long => prediction.probability_long,
                    crate::models::Direction::Short => prediction.probability_short,
                };
                if confidence < self.cfg.ai_confidence_threshold {
                    self.last_eval.lock().insert(symbol.to_string(), now_ts());
                    return;
                }
            }
        }

        self.last_eval.lock().insert(symbol.to_string(), now_ts());

        // Arm: entry price from mark price, else the primary timeframe's close.
        let entry_price = self
            .store
            .get_mark_price(symbol)
            .map(|m| m.mark)
            .or_else(|| self.store.get_latest_kline(symbol, self.cfg.primary_timeframe).map(|c| c.close));
        let Some(entry_price) = entry_price else {
            return;
        };
        let atr = primary.atr;

        let trigger_events: Vec<String> = events.iter().map(|e| e.event_type().to_string()).collect();

        let mut tp_price = None;
        let mut sl_price = None;
        if self.cfg.tracker_enabled {
            let tracked = self.tracker.register_signal(
                symbol,
                scored.direction,
                scored.score,
                entry_price,
                atr,
                trigger_events.clone(),
            );
            tp_price = Some(tracked.tp_price);
            sl_price = Some(tracked.sl_price);
            let _ = self.repository.record_performance(tracked).await;
        }

        let signal = Signal {
            id: format!("{symbol}-{}", now_ts()),
            symbol: symbol.to_string(),
            direction: scored.direction,
            score: scored.score,
            mtf_score: mtf_result.score,
            mtf_aligned: mtf_result.aligned,
            trigger_events,
            features_snapshot: primary,
            timestamp: now_ts(),
            entry_price: Some(entry_price),
            tp_price,
            sl_price,
            atr: Some(atr),
        };

        let _ = self.repository.append_signal(signal.clone()).await;
        let _ = self.broadcast_tx.send(WsEvent::Signal(signal));
        metrics::counter!("signals_emitted_total", "direction" => scored.direction.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, MarkPriceInfo};
    use crate::persistence::SqliteRepository;

    async fn engine_with_store() -> (Arc<SignalEngine>, Arc<RawStore>, Arc<Tracker>) {
        let cfg = {
            let mut c = Config::from_env();
            c.symbols = vec!["BTCUSDT".into()];
            c.timeframes = vec![Timeframe::M5];
            c.primary_timeframe = Timeframe::M5;
            c.mtf_min_aligned = 1;
            c.signal_score_threshold = 0.0;
            c
        };
        let store = Arc::new(RawStore::new(cfg.structure_lookback, cfg.atr_period, cfg.oi_delta_window, cfg.funding_zscore_window));
        let tracker = Arc::new(Tracker::new(&cfg));
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn SignalRepository> =
            Arc::new(SqliteRepository::open(dir.path().join("t.db").to_str().unwrap()).unwrap());
        let (tx, _rx) = broadcast::channel(16);
        let engine = Arc::new(SignalEngine::new(store.clone(), cfg, tracker.clone(), repo, tx, None));
        (engine, store, tracker)
    }

    #[tokio::test]
    async fn flat_market_emits_nothing() {
        let (engine, store, tracker) = engine_with_store().await;
        store.set_features("BTCUSDT", Timeframe::M5, FeatureSnapshot::default());
        store.set_mark_price("BTCUSDT", MarkPriceInfo { mark: 100.0, index: 100.0, funding_rate: 0.0, next_funding_time: 0, ts: 0 });
        engine.evaluate("BTCUSDT").await;
        assert!(!tracker.has_open_signal("BTCUSDT"));
    }

    #[tokio::test]
    async fn missing_features_blocks_evaluation() {
        let (engine, _store, tracker) = engine_with_store().await;
        engine.evaluate("BTCUSDT").await;
        assert!(!tracker.has_open_signal("BTCUSDT"));
    }

    #[tokio::test]
    async fn strong_bullish_confluence_arms_a_long_signal() {
        let (engine, store, tracker) = engine_with_store().await;
        let mut features = FeatureSnapshot::default();
        features.ema_slope = 0.02;
        features.vwap_distance = 0.01;
        features.structure_state = crate::models::StructureState::Uptrend;
        features.breakout = crate::models::Breakout::Bullish;
        features.atr = 2.0;
        store.set_features("BTCUSDT", Timeframe::M5, features);
        store.upsert_kline(
            "BTCUSDT",
            Timeframe::M5,
            Candle { open_time: 0, open: 100.0, high: 101.0, low: 99.0, close: 100.0, base_vol: 1.0, quote_vol: 100.0, closed: true },
        );
        store.set_mark_price("BTCUSDT", MarkPriceInfo { mark: 100.0, index: 100.0, funding_rate: 0.0, next_funding_time: 0, ts: 0 });
        engine.evaluate("BTCUSDT").await;
        assert!(tracker.has_open_signal("BTCUSDT"));
        assert_eq!(tracker.get_open("BTCUSDT").unwrap().direction, crate::models::Direction::Long);
    }
}
