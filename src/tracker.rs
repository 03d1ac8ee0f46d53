//! Tracker: exclusive owner of the open/closed signal lifecycle.
//! Grounded on `original_source/app/signals/tracker.py` and on the
//! teacher's `vault/unified_15m_strategy.rs` open-position bookkeeping
//! (`OpenPosition`/`ExitReason` structural analogue).
//!
//! Single-writer discipline: all mutation goes through `&self` methods
//! backed by `parking_lot::Mutex`, never held across an `.await`.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::models::{now_ts, Direction, Outcome, TrackedSignal};

const CLOSED_RING_CAPACITY: usize = 500;

pub struct Tracker {
    open: Mutex<HashMap<String, TrackedSignal>>,
    closed: Mutex<VecDeque<TrackedSignal>>,
    tp_atr_multiplier: f64,
    sl_atr_multiplier: f64,
    signal_max_ttl: i64,
    close_notifier: Mutex<Option<mpsc::UnboundedSender<TrackedSignal>>>,
}

impl Tracker {
    pub fn new(cfg: &Config) -> Self {
        Tracker {
            open: Mutex::new(HashMap::new()),
            closed: Mutex::new(VecDeque::new()),
            tp_atr_multiplier: cfg.tp_atr_multiplier,
            sl_atr_multiplier: cfg.sl_atr_multiplier,
            signal_max_ttl: cfg.signal_max_ttl,
            close_notifier: Mutex::new(None),
        }
    }

    /// Installs the channel `push_closed` uses to notify the
    /// persistence sink of a closed signal. Set once, from the
    /// composition root, after construction.
    pub fn set_close_notifier(&self, sender: mpsc::UnboundedSender<TrackedSignal>) {
        *self.close_notifier.lock() = Some(sender);
    }

    /// Gate A helper: true when `symbol` has no open signal. Performs
    /// inline TTL expiry as a side effect, matching the original's
    /// `has_open_signal` behavior.
    pub fn has_open_signal(&self, symbol: &str) -> bool {
        self.expire_if_stale(symbol);
        self.open.lock().contains_key(symbol)
    }

    fn expire_if_stale(&self, symbol: &str) {
        let mut open = self.open.lock();
        if let Some(signal) = open.get(symbol) {
            if now_ts() - signal.opened_at > signal.ttl {
                let mut expired = open.remove(symbol).unwrap();
                expired.outcome = Outcome::Expired;
                expired.closed_at = Some(now_ts());
                expired.close_price = Some(expired.entry_price);
                expired.pnl_pct = Some(0.0);
                drop(open);
                self.push_closed(expired);
                metrics::counter!("tracker_closed_total", "outcome" => "expired").increment(1);
            }
        }
    }

    /// Arms and registers a new tracked signal. If an opposite-direction
    /// signal is already open for the symbol, it is closed as
    /// `Reversed` first.
    pub fn register_signal(
        &self,
        symbol: &str,
        direction: Direction,
        score: f64,
        entry_price: f64,
        atr: f64,
        trigger_events: Vec<String>,
    ) -> TrackedSignal {
        let mut open = self.open.lock();
        if let Some(existing) = open.get(symbol) {
            if existing.direction != direction {
                let mut reversed = open.remove(symbol).unwrap();
                reversed.outcome = Outcome::Reversed;
                reversed.closed_at = Some(now_ts());
                reversed.close_price = Some(entry_price);
                reversed.pnl_pct = Some(pnl_pct(&reversed, entry_price));
                drop(open);
                self.push_closed(reversed);
                metrics::counter!("tracker_closed_total", "outcome" => "reversed").increment(1);
                open = self.open.lock();
            }
        }

        let (tp_price, sl_price) = match direction {
            Direction::Long => (
                entry_price + atr * self.tp_atr_multiplier,
                entry_price - atr * self.sl_atr_multiplier,
            ),
            Direction::Short => (
                entry_price - atr * self.tp_atr_multiplier,
                entry_price + atr * self.sl_atr_multiplier,
            ),
        };

        let tracked = TrackedSignal {
            symbol: symbol.to_string(),
            direction,
            score,
            entry_price,
            tp_price,
            sl_price,
            atr_at_entry: atr,
            opened_at: now_ts(),
            ttl: self.signal_max_ttl,
            outcome: Outcome::Open,
            closed_at: None,
            close_price: None,
            pnl_pct: None,
            trigger_events,
        };
        open.insert(symbol.to_string(), tracked.clone());
        metrics::gauge!("signals_open").set(open.len() as f64);
        tracked
    }

    /// Called by the price monitor loop once per open symbol per tick.
    /// Checks TTL first, then TP before SL, for both long and short.
    pub fn check_price(&self, symbol: &str, mark_price: f64) {
        let mut open = self.open.lock();
        let Some(signal) = open.get(symbol) else {
            return;
        };

        if now_ts() - signal.opened_at > signal.ttl {
            let mut expired = open.remove(symbol).unwrap();
            expired.outcome = Outcome::Expired;
            expired.closed_at = Some(now_ts());
            expired.close_price = Some(expired.entry_price);
            expired.pnl_pct = Some(0.0);
            drop(open);
            self.push_closed(expired);
            metrics::counter!("tracker_closed_total", "outcome" => "expired").increment(1);
            return;
        }

        let hit = match signal.direction {
            Direction::Long if mark_price >= signal.tp_price => Some(Outcome::TpHit),
            Direction::Long if mark_price <= signal.sl_price => Some(Outcome::SlHit),
            Direction::Short if mark_price <= signal.tp_price => Some(Outcome::TpHit),
            Direction::Short if mark_price >= signal.sl_price => Some(Outcome::SlHit),
            _ => None,
        };

        if let Some(outcome) = hit {
            let mut closed = open.remove(symbol).unwrap();
            closed.outcome = outcome;
            closed.closed_at = Some(now_ts());
            closed.close_price = Some(mark_price);
            closed.pnl_pct = Some(pnl_pct(&closed, mark_price));
            drop(open);
            self.push_closed(closed);
            metrics::counter!("tracker_closed_total", "outcome" => outcome.as_str()).increment(1);
        }
    }

    pub fn manual_close(&self, symbol: &str, close_price: f64) -> Option<TrackedSignal> {
        let mut open = self.open.lock();
        let mut closed = open.remove(symbol)?;
        closed.outcome = Outcome::Manual;
        closed.closed_at = Some(now_ts());
        closed.close_price = Some(close_price);
        closed.pnl_pct = Some(pnl_pct(&closed, close_price));
        drop(open);
        metrics::counter!("tracker_closed_total", "outcome" => "manual").increment(1);
        self.push_closed(closed.clone());
        Some(closed)
    }

    fn push_closed(&self, signal: TrackedSignal) {
        if let Some(sender) = self.close_notifier.lock().as_ref() {
            let _ = sender.send(signal.clone());
        }
        let mut closed = self.closed.lock();
        closed.push_front(signal);
        closed.truncate(CLOSED_RING_CAPACITY);
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.open.lock().keys().cloned().collect()
    }

    pub fn get_open(&self, symbol: &str) -> Option<TrackedSignal> {
        self.open.lock().get(symbol).cloned()
    }

    pub fn list_open(&self) -> Vec<TrackedSignal> {
        self.open.lock().values().cloned().collect()
    }

    pub fn list_closed(&self) -> Vec<TrackedSignal> {
        self.closed.lock().iter().cloned().collect()
    }

    /// Startup recovery: re-seeds the open table from persisted rows.
    pub fn restore_open(&self, signals: Vec<TrackedSignal>) {
        let mut open = self.open.lock();
        for s in signals {
            open.insert(s.symbol.clone(), s);
        }
        metrics::gauge!("signals_open").set(open.len() as f64);
    }
}

fn pnl_pct(signal: &TrackedSignal, close_price: f64) -> f64 {
    let raw = (close_price - signal.entry_price) / signal.entry_price;
    match signal.direction {
        Direction::Long => raw * 100.0,
        Direction::Short => -raw * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        let mut c = Config::from_env();
        c.tp_atr_multiplier = 2.0;
        c.sl_atr_multiplier = 1.0;
        c.signal_max_ttl = 3600;
        c
    }

    #[test]
    fn long_tp_hit() {
        let tracker = Tracker::new(&cfg());
        tracker.register_signal("BTCUSDT", Direction::Long, 0.8, 100.0, 2.0, vec![]);
        tracker.check_price("BTCUSDT", 104.1);
        let closed = tracker.list_closed();
        assert_eq!(closed[0].outcome, Outcome::TpHit);
    }

    #[test]
    fn short_sl_hit() {
        let tracker = Tracker::new(&cfg());
        tracker.register_signal("ETHUSDT", Direction::Short, 0.8, 100.0, 2.0, vec![]);
        tracker.check_price("ETHUSDT", 102.1);
        let closed = tracker.list_closed();
        assert_eq!(closed[0].outcome, Outcome::SlHit);
    }

    #[test]
    fn reversal_closes_previous_opposite_signal() {
        let tracker = Tracker::new(&cfg());
        tracker.register_signal("BTCUSDT", Direction::Long, 0.8, 100.0, 2.0, vec![]);
        tracker.register_signal("BTCUSDT", Direction::Short, 0.7, 101.0, 2.0, vec![]);
        let closed = tracker.list_closed();
        assert_eq!(closed[0].outcome, Outcome::Reversed);
        assert_eq!(tracker.get_open("BTCUSDT").unwrap().direction, Direction::Short);
    }

    #[test]
    fn ttl_expiry_closes_signal() {
        let mut c = cfg();
        c.signal_max_ttl = -1;
        let tracker = Tracker::new(&c);
        tracker.register_signal("BTCUSDT", Direction::Long, 0.8, 100.0, 2.0, vec![]);
        assert!(!tracker.has_open_signal("BTCUSDT"));
        assert_eq!(tracker.list_closed()[0].outcome, Outcome::Expired);
    }
}
