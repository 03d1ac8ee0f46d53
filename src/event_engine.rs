//! Fixed-interval event sweep. Compares each symbol's current primary-
//! timeframe feature snapshot against the previous sweep's snapshot and
//! emits the six trigger types. Grounded on
//! `original_source/app/events/engine.py`.
//!
//! The previous-snapshot map is updated only after every symbol has
//! been scanned and any events emitted — not just symbols that fired —
//! so a symbol that doesn't trigger this sweep still has fresh history
//! for the next comparison.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::models::{now_ts, Bias, Breakout, Event, FeatureSnapshot};
use crate::raw_store::RawStore;

const SWEEP_INTERVAL_SECS: u64 = 2;

pub fn event_queue(capacity: usize) -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(capacity)
}

pub struct EventEngine {
    store: Arc<RawStore>,
    cfg: Config,
    sender: mpsc::Sender<Event>,
    prev: HashMap<String, FeatureSnapshot>,
}

impl EventEngine {
    pub fn new(store: Arc<RawStore>, cfg: Config, sender: mpsc::Sender<Event>) -> Self {
        EventEngine {
            store,
            cfg,
            sender,
            prev: HashMap::new(),
        }
    }

    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        while !shutdown.load(Ordering::Relaxed) {
            tick.tick().await;
            self.sweep();
        }
    }

    fn sweep(&mut self) {
        let symbols = self.store.known_symbols();
        for symbol in symbols {
            let Some(current) = self.store.get_features(&symbol, self.cfg.primary_timeframe) else {
                continue;
            };
            let previous = self.prev.get(&symbol).copied();
            let events = detect_events(&symbol, &current, previous.as_ref(), &self.cfg);
            for event in events {
                self.emit(event);
            }
            self.prev.insert(symbol, current);
        }
    }

    fn emit(&self, event: Event) {
        metrics::counter!("events_triggered_total", "type" => event.event_type()).increment(1);
        if self.sender.try_send(event).is_err() {
            metrics::counter!("event_queue_dropped_total").increment(1);
            tracing::warn!("event queue full, dropping event");
        }
    }
}

/// Pure detector, separated from the engine's state for testability.
pub fn detect_events(
    symbol: &str,
    current: &FeatureSnapshot,
    previous: Option<&FeatureSnapshot>,
    cfg: &Config,
) -> Vec<Event> {
    let mut events = Vec::new();
    let ts = now_ts();

    // Fires when the current sweep's liquidation total grew past the
    // previous sweep's by more than `liq_spike_threshold`x.
    if let Some(prev) = previous {
        if prev.liq_total_usd > 0.0 && current.liq_total_usd > prev.liq_total_usd * cfg.liq_spike_threshold {
            events.push(Event::LiquidationSpike {
                symbol: symbol.to_string(),
                total_usd: current.liq_total_usd,
                ratio: current.liq_ratio,
                bias: if current.liq_long >= current.liq_short {
                    Bias::Bearish
                } else {
                    Bias::Bullish
                },
                ts,
            });
        }
    }

    // oi_expansion_threshold is a percent-move floor (1.5 == 1.5%).
    if current.oi_delta.abs() * 100.0 > cfg.oi_expansion_threshold {
        events.push(Event::OiExpansion {
            symbol: symbol.to_string(),
            oi_delta_pct: current.oi_delta,
            ts,
        });
    }

    if current.range_expansion > cfg.atr_expansion_threshold {
        events.push(Event::AtrExpansion {
            symbol: symbol.to_string(),
            range_expansion: current.range_expansion,
            ts,
        });
    }

    if current.breakout != Breakout::None {
        let fired_before = previous.map(|p| p.breakout == current.breakout).unwrap_or(false);
        if !fired_before {
            events.push(Event::StructureBreakout {
                symbol: symbol.to_string(),
                direction: current.breakout,
                level: current.breakout_level,
                ts,
            });
        }
    }

    if let Some(prev) = previous {
        let flipped = prev.ob_imbalance != 0.0
            && current.ob_imbalance * prev.ob_imbalance < 0.0
            && current.ob_imbalance.abs() >= cfg.imbalance_flip_threshold;
        if flipped {
            events.push(Event::ImbalanceFlip {
                symbol: symbol.to_string(),
                from: prev.ob_imbalance,
                to: current.ob_imbalance,
                bias: if current.ob_imbalance > 0.0 { Bias::Bullish } else { Bias::Bearish },
                ts,
            });
        }
    }

    if current.funding_zscore.abs() > cfg.funding_extreme_threshold {
        events.push(Event::FundingExtreme {
            symbol: symbol.to_string(),
            zscore: current.funding_zscore,
            bias: if current.funding_zscore > 0.0 { Bias::Bearish } else { Bias::Bullish },
            ts,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StructureState;

    fn base_features() -> FeatureSnapshot {
        FeatureSnapshot::default()
    }

    #[test]
    fn breakout_only_fires_once_per_state() {
        let cfg = Config::from_env();
        let mut current = base_features();
        current.breakout = Breakout::Bullish;
        current.breakout_level = 100.0;
        let events_first = detect_events("BTCUSDT", &current, None, &cfg);
        assert!(events_first.iter().any(|e| matches!(e, Event::StructureBreakout { .. })));

        let previous = current;
        let events_second = detect_events("BTCUSDT", &current, Some(&previous), &cfg);
        assert!(!events_second.iter().any(|e| matches!(e, Event::StructureBreakout { .. })));
    }

    #[test]
    fn atr_expansion_fires_above_threshold() {
        let mut cfg = Config::from_env();
        cfg.atr_expansion_threshold = 1.5;
        let mut current = base_features();
        current.range_expansion = 2.0;
        let events = detect_events("BTCUSDT", &current, None, &cfg);
        assert!(events.iter().any(|e| matches!(e, Event::AtrExpansion { .. })));
    }

    #[test]
    fn neutral_snapshot_fires_nothing() {
        let cfg = Config::from_env();
        let current = base_features();
        assert!(current.structure_state == StructureState::Neutral);
        let events = detect_events("BTCUSDT", &current, None, &cfg);
        assert!(events.is_empty());
    }
}
